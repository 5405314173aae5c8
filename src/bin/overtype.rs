use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "overtype", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the stateless HTTP edit service.
    Serve(ServeArgs),
    /// List the text layers of a local document.
    Inspect(InspectArgs),
    /// Apply one text edit to a local document and write the result.
    Edit(EditArgs),
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Bind address.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Listen port.
    #[arg(long, default_value_t = overtype::server::DEFAULT_PORT)]
    port: u16,

    /// Allowed CORS origin; repeat for several, '*' for any.
    #[arg(long = "allow-origin", default_value = "*")]
    allow_origins: Vec<String>,

    /// Reject uploads larger than this many bytes before decoding.
    #[arg(long, default_value_t = overtype::server::DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: usize,

    /// Worker threads (bounds concurrent in-flight decodes).
    #[arg(long, default_value_t = overtype::server::DEFAULT_WORKERS)]
    workers: usize,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Input document.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Also write a flattened preview PNG here.
    #[arg(long)]
    preview: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct EditArgs {
    /// Input document.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Text layer address (0-based, as printed by `inspect`).
    #[arg(long)]
    address: usize,

    /// Replacement text content.
    #[arg(long)]
    text: String,

    /// Output document path.
    #[arg(long)]
    out: PathBuf,

    /// Also write a post-edit preview PNG here.
    #[arg(long)]
    preview: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Serve(args) => cmd_serve(args),
        Command::Inspect(args) => cmd_inspect(args),
        Command::Edit(args) => cmd_edit(args),
    }
}

fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = overtype::ServerConfig {
        bind: args.bind,
        port: args.port,
        allowed_origins: args.allow_origins,
        max_upload_bytes: args.max_upload_bytes,
        workers: args.workers,
    };
    let handle = overtype::server::start(config)?;
    eprintln!("listening on port {}", handle.port());
    handle.join();
    Ok(())
}

fn cmd_inspect(args: InspectArgs) -> anyhow::Result<()> {
    let bytes = std::fs::read(&args.in_path)
        .with_context(|| format!("read document '{}'", args.in_path.display()))?;

    let outcome = overtype::inspect(&bytes, &overtype::CpuCompositor)?;

    println!("digest: {}", outcome.digest);
    println!(
        "canvas: {}x{}",
        outcome.canvas.width, outcome.canvas.height
    );
    if outcome.layers.is_empty() {
        println!("no text layers");
    }
    for entry in &outcome.layers {
        println!(
            "[{}] {:?} visible={} text={:?}",
            entry.address.0, entry.name, entry.visible, entry.content
        );
    }

    if let Some(path) = args.preview {
        let preview = outcome
            .preview
            .context("compositing failed, no preview available")?;
        write_preview(&path, &preview)?;
    }
    Ok(())
}

fn cmd_edit(args: EditArgs) -> anyhow::Result<()> {
    let bytes = std::fs::read(&args.in_path)
        .with_context(|| format!("read document '{}'", args.in_path.display()))?;

    let edit = overtype::TextEdit {
        address: overtype::LayerAddress(args.address),
        new_text: args.text,
    };

    if let Some(path) = &args.preview {
        let outcome = overtype::mutate(&bytes, &edit, None, &overtype::CpuCompositor)?;
        match outcome.preview {
            Some(preview) => write_preview(path, &preview)?,
            None => eprintln!("compositing failed, skipping preview"),
        }
    }

    let encoded = overtype::reserialize(&bytes, Some(&edit), None)?;
    if let Some(parent) = args.out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    std::fs::write(&args.out, &encoded)
        .with_context(|| format!("write document '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn write_preview(path: &Path, preview: &overtype::PreviewArtifact) -> anyhow::Result<()> {
    std::fs::write(path, &preview.png)
        .with_context(|| format!("write preview '{}'", path.display()))?;
    eprintln!(
        "wrote {} ({}x{})",
        path.display(),
        preview.width,
        preview.height
    );
    Ok(())
}
