//! Field by field comparison of recorded and recomputed execution kinds.

use crate::module::Future;
use alloy_primitives::Address;
use deployment_journal::ExecutionKind;
use std::fmt::Display;

struct Changes(Vec<String>);

impl Changes {
    /// Records a change, naming both values.
    fn value<T: PartialEq + Display>(&mut self, what: &str, recorded: &T, current: &T) {
        if recorded != current {
            self.0
                .push(format!("{what} has been changed from {recorded} to {current}"));
        }
    }

    /// Records a change of a value too large to print.
    fn opaque<T: PartialEq>(&mut self, what: &str, recorded: &T, current: &T) {
        if recorded != current {
            self.0.push(format!("{what} have been changed"));
        }
    }

    /// A future without an explicit `from` accepts any network account.
    fn sender(&mut self, future: &Future, recorded: Address, current: Address, accounts: &[Address]) {
        if future.from().is_some() {
            self.value("From account", &recorded, &current);
        } else if !accounts.contains(&recorded) {
            self.0.push(format!(
                "From account {recorded} is not one of the network's accounts"
            ));
        }
    }
}

/// Differences between what a future recorded when it started and what it
/// resolves to now.
pub(super) fn compare_kinds(
    future: &Future,
    recorded: &ExecutionKind,
    current: &ExecutionKind,
    accounts: &[Address],
) -> Vec<String> {
    let mut changes = Changes(Vec::new());
    match (recorded, current) {
        (
            ExecutionKind::Deployment {
                contract_name: old_name,
                bytecode_hash: old_hash,
                constructor_args: old_args,
                libraries: old_libraries,
                value: old_value,
                from: old_from,
            },
            ExecutionKind::Deployment {
                contract_name,
                bytecode_hash,
                constructor_args,
                libraries,
                value,
                from,
            },
        ) => {
            changes.value("Contract name", old_name, contract_name);
            changes.opaque("Artifact bytecodes", old_hash, bytecode_hash);
            changes.opaque("Constructor args", old_args, constructor_args);
            changes.opaque("Libraries", old_libraries, libraries);
            changes.value("Value", old_value, value);
            changes.sender(future, *old_from, *from, accounts);
        }
        (
            ExecutionKind::Call {
                contract_address: old_address,
                function: old_function,
                args: old_args,
                value: old_value,
                from: old_from,
            },
            ExecutionKind::Call {
                contract_address,
                function,
                args,
                value,
                from,
            },
        ) => {
            changes.value("Contract address", old_address, contract_address);
            changes.value("Function name", old_function, function);
            changes.opaque("Function args", old_args, args);
            changes.value("Value", old_value, value);
            changes.sender(future, *old_from, *from, accounts);
        }
        (
            ExecutionKind::StaticCall {
                contract_address: old_address,
                function: old_function,
                args: old_args,
                name_or_index: old_output,
                from: old_from,
            },
            ExecutionKind::StaticCall {
                contract_address,
                function,
                args,
                name_or_index,
                from,
            },
        ) => {
            changes.value("Contract address", old_address, contract_address);
            changes.value("Function name", old_function, function);
            changes.opaque("Function args", old_args, args);
            changes.value("Function output", old_output, name_or_index);
            changes.sender(future, *old_from, *from, accounts);
        }
        (
            ExecutionKind::EncodeFunctionCall {
                function: old_function,
                args: old_args,
                result: old_result,
            },
            ExecutionKind::EncodeFunctionCall {
                function,
                args,
                result,
            },
        ) => {
            changes.value("Function name", old_function, function);
            changes.opaque("Function args", old_args, args);
            if old_function == function && old_args == args {
                changes.opaque("Encoded results", old_result, result);
            }
        }
        (
            ExecutionKind::ContractAt {
                contract_name: old_name,
                address: old_address,
            },
            ExecutionKind::ContractAt {
                contract_name,
                address,
            },
        ) => {
            changes.value("Contract name", old_name, contract_name);
            changes.value("Address", old_address, address);
        }
        (
            ExecutionKind::ReadEventArgument {
                emitter: old_emitter,
                event_name: old_event,
                event_index: old_index,
                name_or_index: old_argument,
                tx_hash: old_tx,
                ..
            },
            ExecutionKind::ReadEventArgument {
                emitter,
                event_name,
                event_index,
                name_or_index,
                tx_hash,
                ..
            },
        ) => {
            changes.value("Emitter", old_emitter, emitter);
            changes.value("Event name", old_event, event_name);
            changes.value("Event index", old_index, event_index);
            changes.value("Argument name or index", old_argument, name_or_index);
            changes.value("Transaction hash", old_tx, tx_hash);
        }
        (
            ExecutionKind::SendData {
                to: old_to,
                data: old_data,
                value: old_value,
                from: old_from,
            },
            ExecutionKind::SendData {
                to,
                data,
                value,
                from,
            },
        ) => {
            changes.value("To address", old_to, to);
            changes.value("Data", old_data, data);
            changes.value("Value", old_value, value);
            changes.sender(future, *old_from, *from, accounts);
        }
        (recorded, current) => changes.0.push(format!(
            "Execution kind has been changed from {} to {}",
            recorded.tag(),
            current.tag()
        )),
    }
    changes.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{FutureOptions, ModuleBuilder};
    use alloy_primitives::{Bytes, U256};
    use deployment_journal::ArgValue;

    fn send_future(explicit_from: bool) -> Future {
        let mut m = ModuleBuilder::new("M");
        let options = if explicit_from {
            FutureOptions::new().from(m.get_account(0))
        } else {
            FutureOptions::new()
        };
        m.send("ping", Address::repeat_byte(3), Bytes::new(), options);
        m.build().futures.remove(0)
    }

    fn send_data(to: Address, value: u64, from: Address) -> ExecutionKind {
        ExecutionKind::SendData {
            to,
            data: Bytes::new(),
            value: U256::from(value),
            from,
        }
    }

    #[test]
    fn test_send_data_changes_are_listed() {
        let accounts = [Address::repeat_byte(1), Address::repeat_byte(2)];
        let recorded = send_data(Address::repeat_byte(3), 0, accounts[0]);
        let current = send_data(Address::repeat_byte(4), 5, accounts[1]);

        let changes = compare_kinds(&send_future(true), &recorded, &current, &accounts);
        assert_eq!(changes.len(), 3);
        assert!(changes[0].starts_with("To address has been changed"));
        assert_eq!(changes[1], "Value has been changed from 0 to 5");
        assert!(changes[2].starts_with("From account has been changed"));

        // Without an explicit sender the recorded one only has to exist.
        let changes = compare_kinds(&send_future(false), &recorded, &current, &accounts);
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_kind_change() {
        let recorded = send_data(Address::ZERO, 0, Address::ZERO);
        let current = ExecutionKind::EncodeFunctionCall {
            function: "setX".to_string(),
            args: vec![ArgValue::from(1u64)],
            result: Bytes::new(),
        };
        let changes = compare_kinds(&send_future(false), &recorded, &current, &[Address::ZERO]);
        assert_eq!(
            changes,
            vec!["Execution kind has been changed from SEND_DATA to ENCODE_FUNCTION_CALL".to_string()]
        );
    }
}
