#![forbid(unsafe_code)]

//! sigill CLI: sign, verify and canonicalize XML.

use clap::{Parser, Subcommand, ValueEnum};
use sigill::c14n::{C14nMode, Canonicalizer};
use sigill::core::{algorithm, AlgorithmUri, Error, SignatureVersion};
use sigill::dsig::{DsigContext, Reference, SignatureProcessor, VerifyResult};
use sigill::keys::{KeyHandle, KeyKind, KeyUsage, KeysManager};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sigill", about = "XML Digital Signature and canonicalization tool", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging on stderr (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a signed XML document or a detached signature
    Verify {
        /// Signed document, or a detached Signature element
        file: PathBuf,

        /// Document a detached signature covers
        #[arg(long)]
        document: Option<PathBuf>,

        #[command(flatten)]
        keys: KeyArgs,

        #[command(flatten)]
        processing: ProcessingArgs,

        /// Report every failing reference instead of the first
        #[arg(long = "all-failures")]
        all_failures: bool,

        /// Do not check the references of Manifests
        #[arg(long = "skip-manifests")]
        skip_manifests: bool,
    },

    /// Sign an XML document or a set of files
    Sign {
        /// Document to sign (enveloped, enveloping) or the files to list
        /// in a Manifest (detached)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Signature layout
        #[arg(long, value_enum, default_value_t = Layout::Enveloped)]
        layout: Layout,

        /// Signature algorithm URI (default: chosen from the key)
        #[arg(long)]
        algorithm: Option<String>,

        /// Digest algorithm URI
        #[arg(long)]
        digest: Option<String>,

        /// SignedInfo canonicalization method URI
        #[arg(long)]
        c14n: Option<String>,

        #[command(flatten)]
        keys: KeyArgs,

        #[command(flatten)]
        processing: ProcessingArgs,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Canonicalize an XML document
    C14n {
        /// Input XML file
        file: PathBuf,

        /// Canonicalization method URI
        #[arg(long, default_value = algorithm::C14N)]
        method: String,

        /// Keep comments
        #[arg(long = "with-comments")]
        with_comments: bool,

        /// Canonicalize only the element carrying this ID
        #[arg(long)]
        fragment: Option<String>,

        /// Inclusive namespace prefixes (exclusive canonicalization)
        #[arg(long = "inclusive-prefix")]
        inclusive_prefixes: Vec<String>,

        /// Register additional ID attribute names
        #[arg(long = "id-attr")]
        id_attr: Vec<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List supported algorithms
    Info,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Layout {
    /// Signature inside the signed document
    Enveloped,
    /// Document inside the signature
    Enveloping,
    /// Signature over a Manifest of external files
    Detached,
}

#[derive(clap::Args)]
struct KeyArgs {
    /// Private or public key (PKCS#8, SPKI or PKCS#1; PEM or DER)
    #[arg(short = 'k', long)]
    key: Option<PathBuf>,

    /// Named key (NAME:FILE), selectable through KeyName
    #[arg(short = 'K', long = "key-name")]
    key_name: Vec<String>,

    /// X.509 certificate (PEM or DER); when signing, sent in KeyInfo
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Raw HMAC key (binary file)
    #[arg(long = "hmac-key")]
    hmac_key: Option<PathBuf>,
}

#[derive(clap::Args)]
struct ProcessingArgs {
    /// XML Signature version (1.0, 1.1, 2.0)
    #[arg(long = "sig-version", default_value = "1.1", value_parser = parse_version)]
    version: SignatureVersion,

    /// Register additional ID attribute names
    #[arg(long = "id-attr")]
    id_attr: Vec<String>,

    /// Serve URL (or URLs under it) from a local file (URL=FILE)
    #[arg(long = "url-map")]
    url_map: Vec<String>,

    /// Directory relative references are resolved against
    #[arg(long = "base-dir")]
    base_dir: Option<PathBuf>,
}

fn parse_version(s: &str) -> Result<SignatureVersion, String> {
    SignatureVersion::from_str_opt(s).ok_or_else(|| format!("unknown signature version {s:?}"))
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Verify {
            file,
            document,
            keys,
            processing,
            all_failures,
            skip_manifests,
        } => cmd_verify(&file, document.as_deref(), &keys, &processing, all_failures, skip_manifests),

        Commands::Sign {
            files,
            layout,
            algorithm,
            digest,
            c14n,
            keys,
            processing,
            output,
        } => {
            let options = SignOptions {
                layout,
                algorithm,
                digest,
                c14n,
            };
            cmd_sign(&files, &options, &keys, &processing, output)
        }

        Commands::C14n {
            file,
            method,
            with_comments,
            fragment,
            inclusive_prefixes,
            id_attr,
            output,
        } => cmd_c14n(&file, &method, with_comments, fragment, &inclusive_prefixes, &id_attr, output),

        Commands::Info => cmd_info(),
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn cmd_verify(
    file: &Path,
    document: Option<&Path>,
    keys: &KeyArgs,
    processing: &ProcessingArgs,
    all_failures: bool,
    skip_manifests: bool,
) -> Result<bool, Error> {
    let xml = read_file(file)?;
    let mut ctx = build_context(processing, build_keys_manager(keys, KeyUsage::VERIFY)?)?;
    ctx.continue_after_failure = all_failures;
    ctx.check_manifests = !skip_manifests;
    if ctx.resolver.base_dir().is_none() {
        if let Some(dir) = file.parent() {
            ctx.set_base_dir(dir);
        }
    }
    tracing::debug!(file = %file.display(), version = %ctx.version, "verifying");

    let detached = document.map(read_file).transpose()?;
    let processor = SignatureProcessor::with_context(ctx);
    match processor.validate_signature(&xml, detached.as_deref())? {
        VerifyResult::Valid => {
            println!("OK");
            Ok(true)
        }
        VerifyResult::Invalid { failures } => {
            for failure in &failures {
                eprintln!("INVALID: {failure}");
            }
            Ok(false)
        }
    }
}

struct SignOptions {
    layout: Layout,
    algorithm: Option<String>,
    digest: Option<String>,
    c14n: Option<String>,
}

fn cmd_sign(
    files: &[PathBuf],
    options: &SignOptions,
    keys: &KeyArgs,
    processing: &ProcessingArgs,
    output: Option<PathBuf>,
) -> Result<bool, Error> {
    let manager = build_keys_manager(keys, KeyUsage::SIGN)?;
    let key = manager.first_key()?.clone();
    let ctx = build_context(processing, manager)?;
    let version = ctx.version;

    let mut processor = SignatureProcessor::with_context(ctx);
    let algorithm = match &options.algorithm {
        Some(uri) => uri.clone(),
        None => default_signature_algorithm(&key, version)?.to_owned(),
    };
    processor.set_signature_algorithm(&algorithm, key)?;
    if let Some(digest) = &options.digest {
        processor.set_digest_algorithm(digest)?;
    }
    if let Some(c14n) = &options.c14n {
        processor.set_canonicalization_method(c14n)?;
    }

    let signed = match options.layout {
        Layout::Enveloped | Layout::Enveloping => {
            let [file] = files else {
                return Err(Error::Other(format!(
                    "this layout signs exactly one document, {} given",
                    files.len()
                )));
            };
            let document = read_file(file)?;
            if options.layout == Layout::Enveloped {
                processor.set_use_enveloped_signature_transform(true);
                processor.signature_element_for_document(&document)?
            } else {
                processor.signature_for_embedded_document(&document)?
            }
        }
        Layout::Detached => {
            for file in files {
                let uri = file.to_string_lossy();
                let data = std::fs::read(file).map_err(|e| Error::Other(format!("{}: {e}", file.display())))?;
                processor.context_mut().add_resource(&uri, data);
                processor.append_manifest_reference(Reference::new(&uri));
            }
            processor.generate_signature_document(None)?
        }
    };
    tracing::debug!(algorithm = %algorithm, files = files.len(), "signed");
    write_output(output, signed.as_bytes())?;
    Ok(true)
}

fn default_signature_algorithm(key: &KeyHandle, version: SignatureVersion) -> Result<&'static str, Error> {
    let legacy = version == SignatureVersion::V1_0;
    Ok(match key.kind() {
        KeyKind::Rsa if legacy => algorithm::RSA_SHA1,
        KeyKind::Rsa => algorithm::RSA_SHA256,
        KeyKind::Dsa => algorithm::DSA_SHA1,
        KeyKind::EcP256 => algorithm::ECDSA_SHA256,
        KeyKind::EcP384 => algorithm::ECDSA_SHA384,
        KeyKind::Hmac if legacy => algorithm::HMAC_SHA1,
        KeyKind::Hmac => algorithm::HMAC_SHA256,
        other => {
            return Err(Error::KeyMismatch(format!("a {other} key cannot sign")));
        }
    })
}

fn cmd_c14n(
    file: &Path,
    method: &str,
    with_comments: bool,
    fragment: Option<String>,
    inclusive_prefixes: &[String],
    id_attr: &[String],
    output: Option<PathBuf>,
) -> Result<bool, Error> {
    let mode = C14nMode::from_uri(method)
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("{method} is not a canonicalization method")))?;
    let xml = read_file(file)?;

    let mut canonicalizer = Canonicalizer::new(mode).inclusive_prefixes(inclusive_prefixes);
    if with_comments {
        canonicalizer = canonicalizer.with_comments(true);
    }
    if let Some(id) = fragment {
        canonicalizer = canonicalizer.fragment(id);
    }
    for name in id_attr {
        canonicalizer = canonicalizer.id_attr(name.as_str());
    }
    let canonical = canonicalizer.canonicalize_str(&xml)?;
    write_output(output, &canonical)?;
    Ok(true)
}

fn cmd_info() -> Result<bool, Error> {
    println!("sigill: XML Digital Signature and canonicalization");
    for version in [SignatureVersion::V1_0, SignatureVersion::V1_1, SignatureVersion::V2_0] {
        println!();
        println!("Introduced in XML Signature {version}:");
        for uri in AlgorithmUri::all().filter(|a| a.since() == Some(version)) {
            println!("  {:<18} {}", format!("{:?}", uri.family()), uri.as_str());
        }
    }
    println!();
    println!("Encryption algorithms (not version gated):");
    for uri in AlgorithmUri::all().filter(|a| a.since().is_none()) {
        println!("  {:<18} {}", format!("{:?}", uri.family()), uri.as_str());
    }
    println!();
    println!("Key formats: PKCS#8, SPKI, PKCS#1 (PEM or DER), X.509 certificates, raw HMAC keys");
    Ok(true)
}

fn read_file(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|e| Error::Other(format!("{}: {e}", path.display())))
}

fn write_output(path: Option<PathBuf>, data: &[u8]) -> Result<(), Error> {
    match path {
        Some(p) => std::fs::write(&p, data).map_err(|e| Error::Other(format!("{}: {e}", p.display()))),
        None => {
            use std::io::Write;
            std::io::stdout()
                .write_all(data)
                .map_err(|e| Error::Other(format!("stdout: {e}")))
        }
    }
}

fn build_context(processing: &ProcessingArgs, manager: KeysManager) -> Result<DsigContext, Error> {
    let mut ctx = DsigContext::new(processing.version).with_keys_manager(manager);
    for attr in &processing.id_attr {
        ctx.add_id_attr(attr);
    }
    for entry in &processing.url_map {
        let (url, file) = entry
            .split_once('=')
            .ok_or_else(|| Error::Other(format!("invalid url-map {entry:?} (expected URL=FILE)")))?;
        ctx.add_url_map(url, file);
    }
    if let Some(dir) = &processing.base_dir {
        ctx.set_base_dir(dir);
    }
    Ok(ctx)
}

fn load_key_file(path: &Path, usage: KeyUsage) -> Result<KeyHandle, Error> {
    let data = std::fs::read(path).map_err(|e| Error::Other(format!("{}: {e}", path.display())))?;
    sigill::keys::import_key_data(&data, usage)
}

fn build_keys_manager(keys: &KeyArgs, usage: KeyUsage) -> Result<KeysManager, Error> {
    let mut manager = KeysManager::new();
    let mut certificate = match &keys.cert {
        Some(path) => {
            let data = std::fs::read(path).map_err(|e| Error::Other(format!("{}: {e}", path.display())))?;
            Some(sigill::keys::import_certificate_data(&data)?)
        }
        None => None,
    };

    if let Some(path) = &keys.key {
        let mut key = load_key_file(path, usage)?;
        // A signing key carries its certificate into KeyInfo.
        if usage.contains(KeyUsage::SIGN) {
            if let Some(der) = certificate.take().and_then(|c| c.certificate().map(<[u8]>::to_vec)) {
                key = key.with_certificate(der);
            }
        }
        manager.add_key(key);
    }

    for entry in &keys.key_name {
        let (name, file) = entry
            .split_once(':')
            .ok_or_else(|| Error::Other(format!("invalid key-name format: {entry} (expected NAME:FILE)")))?;
        manager.add_key(load_key_file(Path::new(file), usage)?.with_name(name));
    }

    if let Some(cert) = certificate {
        manager.add_key(cert);
    }

    if let Some(path) = &keys.hmac_key {
        let bytes = std::fs::read(path).map_err(|e| Error::Other(format!("{}: {e}", path.display())))?;
        manager.add_key(sigill::keys::build_secret_key(KeyKind::Hmac, &bytes)?);
    }

    Ok(manager)
}
