//! Deploys a small module to the in-process dev chain, then resumes it.
//!
//! Run with `cargo run --example local_deploy`.

use deploy_engine::deployment_journal::NameOrIndex;
use deploy_engine::{
    list_transactions, status, Artifact, DeployConfig, Deployer, DeploymentParameters,
    FutureOptions, LocalChain, MemoryArtifacts, ModuleBuilder,
};
use eyre::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Stores a `uint256`: calls with arguments set it and emit `XSet(uint256)`.
const STORE_BYTECODE: &str = "0x6044600c60003960446000f33660041060125760005460005260206000f35b600435806000556000527f8ce2183d99429d4a7ef17cff4496835be98adb7cc0022fe5b6f7432ff0da9c2c60206000a100";

const STORE_ABI: &str = r#"[
    {"type":"function","name":"x","inputs":[],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"},
    {"type":"function","name":"setX","inputs":[{"name":"value","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},
    {"type":"event","name":"XSet","inputs":[{"name":"value","type":"uint256","indexed":false}],"anonymous":false}
]"#;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let artifacts = MemoryArtifacts::new().with(Artifact {
        contract_name: "Store".to_string(),
        source_name: "contracts/Store.sol".to_string(),
        abi: serde_json::from_str(STORE_ABI)?,
        bytecode: STORE_BYTECODE.to_string(),
        link_references: BTreeMap::new(),
    });

    let mut m = ModuleBuilder::new("StoreModule");
    let store = m.contract("Store", vec![], FutureOptions::new());
    let initial = m.get_parameter("initial", None);
    let set_x = m.call(&store, "setX", vec![initial], FutureOptions::new());
    m.static_call(
        &store,
        "x",
        vec![],
        NameOrIndex::Index(0),
        FutureOptions::new().after(&set_x),
    );
    m.result("store", &store);
    let module = m.build();

    let parameters: DeploymentParameters = serde_json::from_str(
        r#"{ "StoreModule": { "initial": { "type": "uint", "value": "0x2a" } } }"#,
    )?;

    let config = DeployConfig {
        block_polling_interval: Duration::from_millis(50),
        required_confirmations: 1,
        ..DeployConfig::default()
    };
    let deployer = Deployer::new(
        Arc::new(LocalChain::new(5)),
        Arc::new(artifacts),
        config,
    );

    let dir = std::env::temp_dir().join("deploy-engine-local");
    let _ = std::fs::remove_dir_all(&dir);

    let result = deployer.deploy_to_dir(&module, &dir, &parameters).await?;
    println!("First run: {}", serde_json::to_string_pretty(&result)?);

    // Nothing is left to do, so the second run only records its start.
    let result = deployer.deploy_to_dir(&module, &dir, &parameters).await?;
    println!("Second run successful: {}", result.is_success());

    for tx in list_transactions(&dir)? {
        println!("{:30} {:7} {}", tx.future_id, tx.status, tx.tx_hash);
    }
    let status = status(&dir)?;
    println!(
        "{} successful futures in {}",
        status.outcomes.successful.len(),
        dir.display()
    );
    Ok(())
}
