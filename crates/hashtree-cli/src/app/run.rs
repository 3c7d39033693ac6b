//! Command dispatch: parses `Cli`, opens the local store, and routes to
//! one handler per `Commands` variant. `Serve` is the only command that
//! doesn't return once started; everything else is a single request.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use hashtree_cli::{NostrResolverConfig, NostrRootResolver, ResolverEntry, RootResolver};
use hashtree_core::{nhash_encode, nhash_encode_full, Cid, HashTree, NHashData};
use hashtree_store::HashtreeStore;

use super::args::{Cli, Commands};
use super::content::add_directory;
use super::resolve::{self, resolve_cid_input, ResolveOptions};
use super::peers;

fn split_relays(relays: &Option<String>) -> Option<Vec<String>> {
    relays.as_ref().map(|r| {
        r.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

/// Print a resolved `Cid`: the nhash form on stdout (what a user
/// copy-pastes into the next command), the raw hash hex on stderr (so a
/// script redirecting stdout still gets a clean value to parse).
fn print_cid(cid: &Cid) {
    let encoded = match cid.key {
        Some(key) => nhash_encode_full(&NHashData {
            hash: cid.hash,
            decrypt_key: Some(key),
        }),
        None => nhash_encode(&cid.hash),
    };
    match encoded {
        Ok(code) => println!("{}", code),
        Err(e) => {
            eprintln!("warning: failed to encode nhash: {}", e);
            println!("{}", cid.to_hex_string());
        }
    }
    eprintln!("hash: {}", cid.to_hex_string());
}

/// Opens a store for a single CLI invocation: the local tier plus an
/// unauthenticated HTTP read tier against the configured Blossom
/// servers, so `get`/`cat`/`ls`/`verify` can fall through to the network
/// for content this machine doesn't have cached. No P2P tier — that
/// needs a live daemon's `Exchange`, which a one-shot command doesn't
/// have time to connect.
async fn open_store(data_dir: &PathBuf) -> Result<Arc<HashtreeStore>> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let mut store = HashtreeStore::with_options(data_dir, None)
        .await
        .context("failed to open local store")?;

    let config = hashtree_cli::Config::load_or_default();
    let read_servers = config.http.all_read_servers();
    if !read_servers.is_empty() {
        let http = hashtree_blossom::BlossomClient::unauthenticated().with_read_servers(read_servers);
        store = store.with_http(Arc::new(http));
    }

    Ok(Arc::new(store))
}

pub(crate) async fn run() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir();

    match cli.command {
        Commands::Add {
            path,
            public,
            no_ignore,
            publish,
        } => {
            let store = open_store(&data_dir).await?;
            let config = hashtree_core::HashTreeConfig { encrypt: !public };
            let tree = HashTree::with_config(store, config);

            let result = if path.is_dir() {
                add_directory(&tree, &path, !no_ignore).await?
            } else {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                tree.put_file(&bytes).await?.cid
            };

            print_cid(&result);

            if let Some(ref_name) = publish {
                publish_ref(&ref_name, &result, None).await?;
            }

            Ok(())
        }

        Commands::Get { target, output } => {
            let store = open_store(&data_dir).await?;
            let tree = HashTree::new(store);
            let resolved = resolve_cid_input(&target).await?;

            let cid = match resolved.path {
                Some(ref path) => tree.resolve_path(&resolved.cid, path).await?,
                None => resolved.cid,
            };

            if tree.is_directory(&cid).await? {
                anyhow::bail!(
                    "{} is a directory; use `htree ls` or point `htree get` at a file inside it",
                    target
                );
            }

            let out_path =
                output.unwrap_or_else(|| PathBuf::from(hashtree_core::to_hex(&cid.hash)));

            let bytes = tree.read_file(&cid).await?;
            std::fs::write(&out_path, &bytes)
                .with_context(|| format!("failed to write {}", out_path.display()))?;
            eprintln!("wrote {} ({} bytes)", out_path.display(), bytes.len());
            Ok(())
        }

        Commands::Cat { target } => {
            let store = open_store(&data_dir).await?;
            let tree = HashTree::new(store);
            let resolved = resolve_cid_input(&target).await?;

            let cid = match resolved.path {
                Some(ref path) => tree.resolve_path(&resolved.cid, path).await?,
                None => resolved.cid,
            };

            let bytes = tree.read_file(&cid).await?;
            use std::io::Write;
            std::io::stdout().write_all(&bytes)?;
            Ok(())
        }

        Commands::Ls { target } => {
            let store = open_store(&data_dir).await?;
            let tree = HashTree::new(store);
            let resolved = resolve_cid_input(&target).await?;

            let cid = match resolved.path {
                Some(ref path) => tree.resolve_path(&resolved.cid, path).await?,
                None => resolved.cid,
            };

            let mut entries = tree.list_directory(&cid).await?;
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            for entry in entries {
                let kind = if entry.is_tree { "dir " } else { "file" };
                let size = entry
                    .size
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{}  {:>10}  {}", kind, size, entry.name);
            }
            Ok(())
        }

        Commands::Resolve { target, relays } => {
            let opts = ResolveOptions {
                relays: split_relays(&relays),
                ..Default::default()
            };
            let resolved = resolve::resolve_cid_input_with_opts(&target, &opts).await?;
            print_cid(&resolved.cid);
            if let Some(path) = resolved.path {
                eprintln!("path: {}", path);
            }
            Ok(())
        }

        Commands::Publish {
            ref_name,
            hash,
            key,
            push,
            relays,
        } => {
            let key_bytes = match key {
                Some(hex_key) => {
                    Some(hashtree_core::crypto::key_from_hex(&hex_key).context("invalid --key hex")?)
                }
                None => None,
            };
            let hash_bytes = hashtree_core::from_hex(&hash).context("invalid hash hex")?;
            let cid = match key_bytes {
                Some(k) => Cid::encrypted(hash_bytes, k),
                None => Cid::public(hash_bytes),
            };

            publish_ref(&ref_name, &cid, split_relays(&relays)).await?;

            if push {
                push_to_blossom(&data_dir, &cid).await?;
            }

            Ok(())
        }

        Commands::Verify { target } => {
            let store = open_store(&data_dir).await?;
            let tree = HashTree::new(store);
            let resolved = resolve_cid_input(&target).await?;

            let cid = match resolved.path {
                Some(ref path) => tree.resolve_path(&resolved.cid, path).await?,
                None => resolved.cid,
            };

            let result = tree.verify_tree(&cid).await?;
            if result.valid {
                println!("ok: all blocks present");
                Ok(())
            } else {
                println!("missing {} block(s):", result.missing.len());
                for hash in &result.missing {
                    println!("  {}", hashtree_core::to_hex(hash));
                }
                anyhow::bail!("tree verification failed")
            }
        }

        Commands::Peers { addr } => peers::list_peers(&addr).await,

        Commands::Serve { addr, relays } => {
            let config = hashtree_cli::Config::load_or_default();
            let opts = hashtree_cli::daemon::EmbeddedDaemonOptions {
                config,
                data_dir,
                bind_address: addr,
                relays: split_relays(&relays),
            };
            let info = hashtree_cli::daemon::start_embedded(opts).await?;
            println!("htree daemon listening on {}", info.addr);
            println!("npub: {}", info.npub);

            tokio::signal::ctrl_c().await.ok();
            eprintln!("shutting down");
            Ok(())
        }
    }
}

async fn publish_ref(ref_name: &str, cid: &Cid, relays: Option<Vec<String>>) -> Result<()> {
    let (keys, _) = hashtree_cli::config::ensure_keys()?;
    let npub = {
        use nostr::nips::nip19::ToBech32;
        keys.public_key().to_bech32()?
    };

    let mut config = NostrResolverConfig::default();
    config.relays = match relays {
        Some(relays) => relays,
        None => hashtree_cli::Config::load_or_default().nostr.relays,
    };
    config.secret_key = Some(keys);

    let resolver = NostrRootResolver::new(config)
        .await
        .context("failed to start nostr resolver")?;

    let created_at = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let entry = ResolverEntry::public(*cid, created_at);

    resolver.publish(ref_name, entry).await?;
    resolver.flush().await;

    println!("published {}/{} -> {}", npub, ref_name, cid.to_hex_string());
    Ok(())
}

async fn push_to_blossom(data_dir: &PathBuf, cid: &Cid) -> Result<()> {
    use hashtree_blossom::{BlossomClient, NostrKeysSigner};
    use hashtree_core::store::Store;

    let store = open_store(data_dir).await?;
    let tree = HashTree::new(store.clone());
    let entries = tree.walk(cid).await?;

    let (keys, _) = hashtree_cli::config::ensure_keys()?;
    let signer = Arc::new(NostrKeysSigner::new(keys));
    let config = hashtree_cli::Config::load_or_default();
    let client = BlossomClient::new(signer).with_write_servers(config.http.all_write_servers());

    let mut pushed = 0usize;
    let mut failed = 0usize;
    for entry in &entries {
        let bytes = match Store::get(store.as_ref(), &entry.cid.hash).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                eprintln!("warning: missing block {} locally, skipping push", entry.path);
                failed += 1;
                continue;
            }
            Err(e) => {
                eprintln!("warning: failed to read {}: {}", entry.path, e);
                failed += 1;
                continue;
            }
        };
        match client.upload_if_missing(&bytes).await {
            Ok(_) => pushed += 1,
            Err(e) => {
                eprintln!("warning: failed to push {}: {}", entry.path, e);
                failed += 1;
            }
        }
    }

    println!("pushed {} block(s) to blossom ({} failed)", pushed, failed);
    Ok(())
}
