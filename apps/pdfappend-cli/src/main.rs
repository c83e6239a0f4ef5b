//! pdfappend
//!
//! Command-line front end: every command that changes a file appends a new
//! revision and leaves the original bytes untouched.

mod profile;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pdfappend_core::{
    validate_signatures, AppendOptions, Appender, PdfSignature, Pkcs7Handler, SignatureField,
    SignatureHandler, WriteSummary,
};
use shared_crypto::EphemeralIdentity;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::profile::SignProfile;

#[derive(Parser, Debug)]
#[command(name = "pdfappend")]
#[command(version, about = "Edit and sign PDFs through incremental revisions")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show page count, revision format and signatures
    Info { input: PathBuf },

    /// Append a blank page
    AddBlankPage {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Page width in points
        #[arg(long, default_value = "612")]
        width: f32,
        /// Page height in points
        #[arg(long, default_value = "792")]
        height: f32,
    },

    /// Remove a page (1-based)
    RemovePage {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        page: u32,
    },

    /// Append pages of another PDF, e.g. `--pages 1-3,5`
    Import {
        input: PathBuf,
        source: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Page ranges of the source; all pages when omitted
        #[arg(long)]
        pages: Option<String>,
    },

    /// Add a visible signature field and sign it
    Sign {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Page carrying the signature field (1-based)
        #[arg(short, long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "Signature1")]
        field: String,
        /// Hex-encoded P-256 private key; a throwaway key is used otherwise
        #[arg(long)]
        key: Option<PathBuf>,
        /// TOML signing profile
        #[arg(long)]
        profile: Option<PathBuf>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        location: Option<String>,
    },

    /// Check every signature of a PDF
    Verify { input: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Reports go to stdout, logs to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match args.command {
        Command::Info { input } => info(&input),
        Command::AddBlankPage {
            input,
            output,
            width,
            height,
        } => {
            let mut appender = open(&input, AppendOptions::default())?;
            appender.new_page([0.0, 0.0, width, height]);
            finish(&mut appender, &output)
        }
        Command::RemovePage {
            input,
            output,
            page,
        } => {
            let mut appender = open(&input, AppendOptions::default())?;
            appender
                .remove_page(page)
                .with_context(|| format!("Cannot remove page {}", page))?;
            finish(&mut appender, &output)
        }
        Command::Import {
            input,
            source,
            output,
            pages,
        } => {
            let source_doc = lopdf::Document::load(&source)
                .with_context(|| format!("Failed to parse {}", source.display()))?;
            let count = source_doc.get_pages().len() as u32;
            let numbers = match pages {
                Some(ranges) => parse_ranges(&ranges, count)?,
                None => (1..=count).collect(),
            };

            let mut appender = open(&input, AppendOptions::default())?;
            appender
                .import_pages(&source_doc, &numbers)
                .context("Failed to import pages")?;
            finish(&mut appender, &output)
        }
        Command::Sign {
            input,
            output,
            page,
            field,
            key,
            profile,
            name,
            reason,
            location,
        } => {
            let profile = match profile {
                Some(path) => SignProfile::from_file(path)?,
                None => SignProfile::default(),
            };
            let identity = match key {
                Some(path) => load_identity(&path)?,
                None => {
                    tracing::warn!("no --key given, signing with a throwaway key");
                    EphemeralIdentity::generate()
                }
            };
            let identity = match name.or_else(|| profile.name.clone()) {
                Some(name) => identity.with_name(name),
                None => identity,
            };

            let mut handler = Pkcs7Handler::new(identity);
            if let Some(reserve) = profile.reserve {
                handler = handler.with_reserve(reserve);
            }
            let mut signature = PdfSignature::new(handler);
            if let Some(reason) = reason.or(profile.reason) {
                signature = signature.with_reason(reason);
            }
            if let Some(location) = location.or(profile.location) {
                signature = signature.with_location(location);
            }
            if let Some(contact) = profile.contact {
                signature = signature.with_contact_info(contact);
            }

            let mut field = SignatureField::new(field).with_signature(signature);
            if let Some(rect) = profile.rect {
                field = field.with_rect(rect);
            }

            let mut appender = open(&input, profile.options)?;
            appender
                .sign(page, field)
                .with_context(|| format!("Cannot place a signature on page {}", page))?;
            finish(&mut appender, &output)
        }
        Command::Verify { input } => verify(&input),
    }
}

fn open(path: &Path, options: AppendOptions) -> anyhow::Result<Appender> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Appender::load_with_options(bytes, options)
        .with_context(|| format!("Failed to load {}", path.display()))
}

fn finish(appender: &mut Appender, output: &Path) -> anyhow::Result<()> {
    let summary = appender
        .write_to_file(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    print_summary(&summary, output);
    Ok(())
}

fn print_summary(summary: &WriteSummary, output: &Path) {
    println!(
        "{}: {} bytes appended ({} replaced, {} new objects, {} signatures)",
        output.display(),
        summary.revision_len(),
        summary.replaced,
        summary.fresh,
        summary.signatures,
    );
}

fn load_identity(path: &Path) -> anyhow::Result<EphemeralIdentity> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file: {}", path.display()))?;
    let bytes = hex::decode(text.trim()).context("Key file is not hex")?;
    EphemeralIdentity::from_private_key(&bytes).context("Invalid P-256 private key")
}

fn info(path: &Path) -> anyhow::Result<()> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let appender = Appender::load(bytes.clone())
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let revisions = bytes.windows(5).filter(|window| window == b"%%EOF").count();

    println!("File:       {}", path.display());
    println!("Size:       {} bytes", bytes.len());
    println!("Pages:      {}", appender.page_count());
    println!("Revisions:  {}", revisions);
    println!("Objects:    {}", appender.baseline().objects.len());

    let verifier = Pkcs7Handler::new(EphemeralIdentity::generate());
    let reports = validate_signatures(&bytes, &[&verifier as &dyn SignatureHandler])?;
    println!("Signatures: {}", reports.len());
    Ok(())
}

fn verify(path: &Path) -> anyhow::Result<()> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let verifier = Pkcs7Handler::new(EphemeralIdentity::generate());
    let reports = validate_signatures(&bytes, &[&verifier as &dyn SignatureHandler])
        .with_context(|| format!("Failed to check {}", path.display()))?;

    if reports.is_empty() {
        println!("{}: no signatures", path.display());
        return Ok(());
    }

    let mut failed = 0;
    for report in &reports {
        let status = if report.valid { "valid" } else { "INVALID" };
        let coverage = if report.covers_document {
            "whole document"
        } else {
            "earlier revision"
        };
        println!(
            "{}: {} ({}, covers {})",
            report.field, status, report.sub_filter, coverage
        );
        if !report.valid {
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{} of {} signatures failed", failed, reports.len());
    }
    Ok(())
}

/// Parse page ranges like "1-3, 5" into page numbers in the given order
fn parse_ranges(input: &str, count: u32) -> anyhow::Result<Vec<u32>> {
    let mut pages = Vec::new();
    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (start, end) = match part.split_once('-') {
            Some((start, end)) => (start.trim(), end.trim()),
            None => (part, part),
        };
        let start: u32 = start
            .parse()
            .with_context(|| format!("Invalid page number: {}", start))?;
        let end: u32 = end
            .parse()
            .with_context(|| format!("Invalid page number: {}", end))?;
        if start == 0 || start > end || end > count {
            bail!("Page range {} is outside 1-{}", part, count);
        }
        pages.extend(start..=end);
    }
    if pages.is_empty() {
        bail!("No pages selected");
    }
    Ok(pages)
}
