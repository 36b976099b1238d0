use anyhow::Context;
use log::info;

use pow_ledger::{Amount, Blockchain, LedgerConfig};

// Load settings from the TOML file given as first argument, or use defaults
fn load_config() -> anyhow::Result<LedgerConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let config = LedgerConfig::load(&path)
                .with_context(|| format!("Failed to load config from {}", path))?;
            info!("Loaded config from {}", path);
            Ok(config)
        }
        None => Ok(LedgerConfig::default()),
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = load_config()?;
    info!(
        "Mining with difficulty {} and reward {}",
        config.difficulty, config.mining_reward
    );

    let my_address = "my_blockchain_address";
    let blockchain = Blockchain::with_config(my_address, config)?;
    print!("{}", blockchain.render_chain());

    blockchain.add_transaction("A", "B", Amount::from_num(1));
    blockchain.mine();
    print!("{}", blockchain.render_chain());

    blockchain.add_transaction("C", "D", Amount::from_num(2));
    blockchain.add_transaction("X", "Y", Amount::from_num(3));
    blockchain.mine();
    print!("{}", blockchain.render_chain());

    for address in [my_address, "C", "D"] {
        println!("{} {}", address, blockchain.balance_of(address));
    }

    info!("Chain valid: {}", blockchain.is_valid());

    Ok(())
}
