//! SP Uploadr - chunked large-file uploads to SharePoint-style document libraries

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sp_uploadr::logging::{self, LogFormat};
use sp_uploadr::upload::ChunkReader;
use sp_uploadr::{metrics, Config, SpClient, Uploader};
use std::path::{Path, PathBuf};
use tracing::info;

/// SP Uploadr - chunked uploads over the SharePoint REST API
#[derive(Parser, Debug)]
#[command(name = "sp-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "sp-uploadr.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log format (text, json); overrides the config file
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Print Prometheus metrics to stdout when done
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file into a folder
    Upload {
        /// Local file to upload
        file: PathBuf,

        /// Server-relative URL of the destination folder
        #[arg(short, long)]
        folder: String,

        /// Remote file name (defaults to the local file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Chunk size in bytes (overrides the config file)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Replace an existing remote file
        #[arg(long)]
        overwrite: bool,

        /// Download the stored file afterwards and compare it byte for byte
        #[arg(long)]
        verify: bool,
    },

    /// Download a file's content
    Download {
        /// Server-relative URL of the file
        url: String,

        /// Where to write the content
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    let format = args.log_format.unwrap_or(config.logging.format);
    logging::init_subscriber(level, format)?;

    info!("Starting SP Uploadr v{}", sp_uploadr::VERSION);
    info!("Loaded configuration from {:?}", args.config);

    let client = SpClient::new(config.client_config())?;

    let result = match args.command {
        Command::Upload {
            file,
            folder,
            name,
            chunk_size,
            overwrite,
            verify,
        } => {
            let upload = UploadCommand {
                file,
                folder,
                name,
                chunk_size,
                overwrite,
                verify,
            };
            upload.run(client, &config).await
        }
        Command::Download { url, output } => download(client, &url, &output).await,
    };

    if args.print_metrics {
        print!("{}", metrics::render());
    }

    result
}

struct UploadCommand {
    file: PathBuf,
    folder: String,
    name: Option<String>,
    chunk_size: Option<usize>,
    overwrite: bool,
    verify: bool,
}

impl UploadCommand {
    async fn run(self, client: SpClient, config: &Config) -> anyhow::Result<()> {
        let file_name = match self.name {
            Some(name) => name,
            None => self
                .file
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .context("Cannot derive a remote name from the local path; pass --name")?,
        };

        let length = tokio::fs::metadata(&self.file)
            .await
            .with_context(|| format!("Failed to stat {:?}", self.file))?
            .len();

        let mut options = config.upload.options().with_content_length(length);
        if let Some(chunk_size) = self.chunk_size {
            options = options.with_chunk_size(chunk_size);
        }
        if self.overwrite {
            options = options.with_overwrite(true);
        }

        let folder = client.folder(&self.folder);
        let uploader = Uploader::new(client);
        let policy = config.upload.retry.policy();

        let path = self.file.clone();
        let stored = policy
            .upload(&uploader, &folder, &file_name, &options, || {
                tokio::fs::File::open(path.clone())
            })
            .await?;

        info!(
            url = %stored.server_relative_url,
            bytes = length,
            "Stored file"
        );
        println!("{}", stored.server_relative_url);

        if self.verify {
            let remote = uploader.download(&stored.server_relative_url).await?;
            verify_content(&self.file, &remote, options.chunk_size).await?;
            info!(url = %stored.server_relative_url, "Verified remote content");
        }

        Ok(())
    }
}

/// Compare a local file with downloaded content, one chunk at a time
async fn verify_content(path: &Path, remote: &[u8], chunk_size: usize) -> anyhow::Result<()> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = ChunkReader::new(file, chunk_size);
    let mut offset = 0usize;

    while let Some(chunk) = reader.next_chunk().await? {
        let end = offset + chunk.len();
        if end > remote.len() || remote[offset..end] != chunk[..] {
            bail!("Remote content differs from {:?} near offset {}", path, offset);
        }
        offset = end;
    }

    if offset != remote.len() {
        bail!(
            "Remote content is {} bytes, local file is {} bytes",
            remote.len(),
            offset
        );
    }
    Ok(())
}

async fn download(client: SpClient, url: &str, output: &Path) -> anyhow::Result<()> {
    let uploader = Uploader::new(client);
    let content = uploader.download(url).await?;
    tokio::fs::write(output, &content)
        .await
        .with_context(|| format!("Failed to write {:?}", output))?;
    info!(url = url, bytes = content.len(), output = ?output, "Downloaded file");
    Ok(())
}
