//! `htree`: content-addressed filesystem CLI and embedded daemon.
//!
//! Usage:
//!   htree add <path> [--public] [--no-ignore] [--publish <ref_name>]
//!   htree get <target> [-o <output>]
//!   htree cat <target>
//!   htree ls <target>
//!   htree resolve <target> [--relays <relays>]
//!   htree publish <ref_name> <hash> [--key <key>] [--push] [--relays <relays>]
//!   htree verify <target>
//!   htree peers [--addr <addr>]
//!   htree serve [--addr <addr>] [--relays <relays>]

mod app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = app::run().await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
