use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use cryptoblob_core::primitives;
use cryptoblob_core::sealer::{self, KnownTenant};
use cryptoblob_core::unsealer;
use cryptoblob_core::CryptoBlob;
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "cryptoblob")]
#[command(about = "Pack and unpack tenant-scoped encrypted directory blobs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh 32-byte symmetric key, hex-encoded.
    Newkey,

    /// Pack a source directory into a blob.
    Pack {
        #[arg(long)]
        src: PathBuf,
        #[arg(long)]
        master_key: String,
        #[arg(long)]
        out: PathBuf,
        /// Side-file recording previously issued tenant keys, so repacking
        /// doesn't mint new identities for tenants already known.
        #[arg(long)]
        tenant_keys: Option<PathBuf>,
    },

    /// Unpack the master view of a blob.
    UnpackMaster {
        #[arg(long)]
        blob: PathBuf,
        #[arg(long)]
        master_key: String,
        #[arg(long)]
        dest: PathBuf,
    },

    /// Unpack a single tenant's view of a blob.
    UnpackTenant {
        #[arg(long)]
        blob: PathBuf,
        /// `<key_id>:<reader_key_hex>`, as handed out by `list-tenants` or
        /// `pack --tenant-keys`.
        #[arg(long)]
        reader_key: String,
        #[arg(long)]
        dest: PathBuf,
    },

    /// List the tenants known to a blob's master manifest.
    ListTenants {
        #[arg(long)]
        blob: PathBuf,
        #[arg(long)]
        master_key: String,
    },
}

/// The on-disk bookkeeping side-file tracked by `--tenant-keys`. Not part
/// of the blob's own wire format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TenantKeysFile {
    max_id: i64,
    tenants: Vec<TenantKeysEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TenantKeysEntry {
    name: String,
    key_id: i32,
    writer_key_hex: String,
    reader_key_hex: String,
    /// `<key_id>:<reader_key_hex>`, ready to hand a tenant for `unpack-tenant
    /// --reader-key`.
    reader_key_token: String,
}

fn parse_key(hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str).context("key is not valid hex")?;
    bytes
        .try_into()
        .map_err(|_| anyhow!("key must be exactly 32 bytes"))
}

/// Parses the frozen textual `reader_key` token `<key_id>:<reader_key_hex>`.
fn parse_reader_key_token(token: &str) -> Result<(i32, Vec<u8>)> {
    let (key_id, reader_key_hex) = token
        .split_once(':')
        .ok_or_else(|| anyhow!("reader key must be in `<key_id>:<reader_key_hex>` form"))?;
    let key_id: i32 = key_id
        .parse()
        .context("key_id portion of reader key is not an integer")?;
    let reader_key = hex::decode(reader_key_hex).context("reader key is not valid hex")?;
    Ok((key_id, reader_key))
}

/// Formats the frozen textual `reader_key` token `<key_id>:<reader_key_hex>`.
fn format_reader_key_token(key_id: i32, reader_key: &[u8]) -> String {
    format!("{key_id}:{}", hex::encode(reader_key))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Newkey => {
            let key = primitives::new_key();
            println!("{}", hex::encode(key));
        }

        Commands::Pack {
            src,
            master_key,
            out,
            tenant_keys,
        } => {
            let master_key = parse_key(&master_key)?;

            let tenant_keys_file = match &tenant_keys {
                Some(path) if path.exists() => {
                    let data = fs::read_to_string(path)?;
                    serde_json::from_str::<TenantKeysFile>(&data)?
                }
                _ => TenantKeysFile::default(),
            };

            let known: Vec<KnownTenant> = tenant_keys_file
                .tenants
                .iter()
                .map(|t| -> Result<KnownTenant> {
                    Ok(KnownTenant {
                        name: t.name.clone(),
                        key_id: t.key_id,
                        writer_key: hex::decode(&t.writer_key_hex)?,
                        reader_key: hex::decode(&t.reader_key_hex)?,
                    })
                })
                .collect::<Result<_>>()?;

            let blob = sealer::pack(&src, &master_key, tenant_keys_file.max_id, &known)?;
            fs::write(&out, blob.dump_to_blob()?)?;

            if let Some(path) = tenant_keys {
                let manifest = unsealer::unseal_master(&blob, &master_key)?;
                let entries: Vec<TenantKeysEntry> = manifest
                    .tenants_keys
                    .iter()
                    .map(|t| TenantKeysEntry {
                        name: t.tenant_name.clone(),
                        key_id: t.key_id,
                        writer_key_hex: hex::encode(&t.writer_key),
                        reader_key_hex: hex::encode(&t.reader_key),
                        reader_key_token: format_reader_key_token(t.key_id, &t.reader_key),
                    })
                    .collect();
                let updated = TenantKeysFile {
                    max_id: blob.max_id,
                    tenants: entries,
                };
                fs::write(&path, serde_json::to_string_pretty(&updated)?)?;
            }

            println!("packed {} bytes to {}", fs::metadata(&out)?.len(), out.display());
        }

        Commands::UnpackMaster {
            blob,
            master_key,
            dest,
        } => {
            let master_key = parse_key(&master_key)?;
            let blob = CryptoBlob::load_from_blob(&fs::read(blob)?)?;
            let manifest = unsealer::unseal_master(&blob, &master_key)?;
            fs::create_dir_all(&dest)?;
            unsealer::writeout_master(&blob, &manifest, &dest)?;
            println!("wrote master view to {}", dest.display());
        }

        Commands::UnpackTenant {
            blob,
            reader_key,
            dest,
        } => {
            let (key_id, reader_key_bytes) = parse_reader_key_token(&reader_key)?;
            let reader_key = sealer::reader_key_from_bytes(&reader_key_bytes)?;
            let blob = CryptoBlob::load_from_blob(&fs::read(blob)?)?;
            fs::create_dir_all(&dest)?;
            unsealer::writeout_tenant(&blob, key_id, &reader_key, &dest)?;
            println!("wrote tenant {key_id} view to {}", dest.display());
        }

        Commands::ListTenants { blob, master_key } => {
            let master_key = parse_key(&master_key)?;
            let blob = CryptoBlob::load_from_blob(&fs::read(blob)?)?;
            let manifest = unsealer::unseal_master(&blob, &master_key)?;
            let mut table = HashMap::new();
            for tenant in &manifest.tenants_keys {
                table.insert(
                    tenant.tenant_name.clone(),
                    format_reader_key_token(tenant.key_id, &tenant.reader_key),
                );
            }
            println!("{}", serde_json::to_string_pretty(&table)?);
        }
    }

    Ok(())
}
