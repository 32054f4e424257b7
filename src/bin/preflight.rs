use namedstore::infra::{config, init_tracing};
use namedstore::{EntityDescriptor, NullCache, ObjectRepository, RelationalStore, SearchOptions, StoreConfig};
use std::sync::Arc;

fn usage_and_exit() -> ! {
    eprintln!(
        "Usage: cargo run --bin preflight -- [--install] <type_name>...\n\
         \n\
         Requires env vars:\n\
           DATABASE_URL\n\
         Optional:\n\
           TABLE_PREFIX, DB_ENGINE, DB_CHARSET, DB_COLLATE, DB_MAX_CONNECTIONS\n"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        usage_and_exit();
    }

    let install = args.iter().any(|a| a == "--install");
    let type_names: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();
    if type_names.is_empty() {
        usage_and_exit();
    }

    let store_config = StoreConfig::from_env()?;
    println!("> Preflight:");
    println!("  TABLE_PREFIX={:?}", store_config.table_prefix);
    println!("  DB_MAX_CONNECTIONS={}", config::max_connections()?);

    let store = Arc::new(RelationalStore::connect(&store_config).await?);
    println!("  Connected ({:?}).", store.dialect());

    for type_name in type_names {
        let descriptor = EntityDescriptor::plain(type_name.as_str())?;
        let repo = ObjectRepository::new(store.clone(), Arc::new(NullCache), descriptor);

        if install {
            repo.install_schema().await?;
            println!("  Installed schema for '{}' ({}, {}).", type_name, repo.table(), repo.meta_table());
        }

        let listing = repo
            .search(
                "",
                SearchOptions {
                    limit: 1,
                    ..SearchOptions::default()
                },
            )
            .await
            .map_err(|e| anyhow::anyhow!("Failed to query '{}': {}", repo.table(), e))?;
        println!("  {}: {} objects", type_name, listing.total_matching);
    }

    println!("> Preflight OK.");
    Ok(())
}
