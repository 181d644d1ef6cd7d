//! Contracts and helpers shared by the unit tests.
//!
//! The contracts are hand-assembled so that the tests do not need a
//! compiler. `Foo` stores a single `uint256`: any call with arguments
//! stores the first one and emits `XSet(uint256)`, a bare selector returns
//! the stored value.

use crate::artifacts::{Artifact, LinkReference, MemoryArtifacts};
use crate::DeployConfig;
use std::collections::BTreeMap;
use std::time::Duration;

pub(crate) const FOO_BYTECODE: &str = "0x6044600c60003960446000f33660041060125760005460005260206000f35b600435806000556000527f8ce2183d99429d4a7ef17cff4496835be98adb7cc0022fe5b6f7432ff0da9c2c60206000a100";

/// Reverts with `Error("nope")` on every call.
const FAILER_BYTECODE: &str = "0x6070600c60003960706000f36064600c60003960646000fd08c379a0000000000000000000000000000000000000000000000000000000000000002000000000000000000000000000000000000000000000000000000000000000046e6f706500000000000000000000000000000000000000000000000000000000";

/// A constructor that reverts without data.
const REVERTER_BYTECODE: &str = "0x60006000fd";

const FOO_ABI: &str = r#"[
    {"type":"function","name":"x","inputs":[],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"},
    {"type":"function","name":"setX","inputs":[{"name":"value","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},
    {"type":"event","name":"XSet","inputs":[{"name":"value","type":"uint256","indexed":false}],"anonymous":false}
]"#;

const BAR_ABI: &str = r#"[
    {"type":"constructor","inputs":[{"name":"foo","type":"address"}],"stateMutability":"nonpayable"},
    {"type":"function","name":"x","inputs":[],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"},
    {"type":"function","name":"setX","inputs":[{"name":"value","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},
    {"type":"event","name":"XSet","inputs":[{"name":"value","type":"uint256","indexed":false}],"anonymous":false}
]"#;

const FAILER_ABI: &str = r#"[
    {"type":"function","name":"fail","inputs":[],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"},
    {"type":"function","name":"poke","inputs":[{"name":"value","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"}
]"#;

fn artifact(name: &str, abi: &str, bytecode: &str) -> Artifact {
    Artifact {
        contract_name: name.to_string(),
        source_name: format!("contracts/{name}.sol"),
        abi: serde_json::from_str(abi).unwrap(),
        bytecode: bytecode.to_string(),
        link_references: BTreeMap::new(),
    }
}

pub(crate) fn foo_artifact() -> Artifact {
    artifact("Foo", FOO_ABI, FOO_BYTECODE)
}

/// Same code as `Foo`, with an `address` constructor argument.
pub(crate) fn bar_artifact() -> Artifact {
    artifact("Bar", BAR_ABI, FOO_BYTECODE)
}

/// A `Foo` library, for linking.
pub(crate) fn lib_artifact() -> Artifact {
    artifact("Lib", "[]", FOO_BYTECODE)
}

/// `Foo`'s creation code followed by a placeholder for `Lib`'s address.
/// The constructor never reads the placeholder.
pub(crate) fn uses_lib_artifact() -> Artifact {
    let mut artifact = artifact(
        "UsesLib",
        FOO_ABI,
        &format!("{FOO_BYTECODE}__$8f4e2a0c1b3d5e7f9a1b2c3d4e5f6a7b8c$__"),
    );
    artifact.link_references = BTreeMap::from([(
        "contracts/Lib.sol".to_string(),
        BTreeMap::from([(
            "Lib".to_string(),
            vec![LinkReference {
                start: 80,
                length: 20,
            }],
        )]),
    )]);
    artifact
}

pub(crate) fn failer_artifact() -> Artifact {
    artifact("Failer", FAILER_ABI, FAILER_BYTECODE)
}

pub(crate) fn reverter_artifact() -> Artifact {
    artifact("Reverter", "[]", REVERTER_BYTECODE)
}

pub(crate) fn test_artifacts() -> MemoryArtifacts {
    MemoryArtifacts::new()
        .with(foo_artifact())
        .with(bar_artifact())
        .with(lib_artifact())
        .with(uses_lib_artifact())
        .with(failer_artifact())
        .with(reverter_artifact())
}

/// Fast polling and single-block confirmations for automined chains.
pub(crate) fn test_config() -> DeployConfig {
    DeployConfig {
        block_polling_interval: Duration::from_millis(10),
        time_before_bumping_fees: Duration::from_secs(60),
        required_confirmations: 1,
        rpc_retries: 0,
        ..DeployConfig::default()
    }
}
