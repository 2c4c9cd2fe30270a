use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use tracing::debug;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;
use vf_core::VirtError;
use vf_core::VirtResult;
use vf_engine::RenderProps;
use vf_engine::ResourceStores;
use vf_engine::SessionConfig;
use vf_engine::VirtualizationSession;
use vf_net::FetchClient;
use vf_net::FetchClientConfig;
use vf_net::TrustStoreMode;
use vf_storage::ArchiveStore;
use vf_storage::DirectoryVault;
use vf_storage::VaultStore;

const DEFAULT_URL: &str = "archive:/index.html";
const LOG_ENV: &str = "VFRAME_LOG";
const DEFAULT_LOG_FILTER: &str = "vf_engine=info,warn";
const USAGE: &str = "\
usage: vframe [--archive <zip>] [--vault <dir>] [--url <target>] [--root-url <url>]
              [--host-origin <url>] [--trust-os-roots] [--no-scripts] [--no-dark-mode]
              [--dump-frames]";

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    archive: Option<PathBuf>,
    vault: Option<PathBuf>,
    url: String,
    root_url: Option<Url>,
    host_origin: Option<Url>,
    trust_store_mode: TrustStoreMode,
    run_scripts: bool,
    dark_mode: bool,
    dump_frames: bool,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            archive: None,
            vault: None,
            url: DEFAULT_URL.to_owned(),
            root_url: None,
            host_origin: None,
            trust_store_mode: TrustStoreMode::WebPkiOnly,
            run_scripts: true,
            dark_mode: true,
            dump_frames: false,
        }
    }
}

fn main() -> ExitCode {
    init_logging();

    let options = match options_from_args(std::env::args().skip(1)) {
        Ok(Some(options)) => options,
        Ok(None) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(error) => {
            eprintln!("vframe: {error}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("vframe: {error}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `Ok(None)` means help was requested.
fn options_from_args(args: impl IntoIterator<Item = String>) -> Result<Option<CliOptions>, String> {
    let mut options = CliOptions::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "--archive" => {
                let path = args
                    .next()
                    .ok_or_else(|| "missing path after --archive".to_owned())?;
                options.archive = Some(PathBuf::from(path));
            }
            "--vault" => {
                let path = args
                    .next()
                    .ok_or_else(|| "missing directory after --vault".to_owned())?;
                options.vault = Some(PathBuf::from(path));
            }
            "--url" => {
                options.url = args
                    .next()
                    .ok_or_else(|| "missing target after --url".to_owned())?;
            }
            "--root-url" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing url after --root-url".to_owned())?;
                options.root_url = Some(parse_url("--root-url", &value)?);
            }
            "--host-origin" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing url after --host-origin".to_owned())?;
                options.host_origin = Some(parse_url("--host-origin", &value)?);
            }
            "--trust-os-roots" => options.trust_store_mode = TrustStoreMode::WebPkiAndOs,
            "--no-scripts" => options.run_scripts = false,
            "--no-dark-mode" => options.dark_mode = false,
            "--dump-frames" => options.dump_frames = true,
            other => return Err(format!("unrecognized argument `{other}`")),
        }
    }
    Ok(Some(options))
}

fn parse_url(flag: &str, value: &str) -> Result<Url, String> {
    Url::parse(value).map_err(|error| format!("invalid url `{value}` for {flag}: {error}"))
}

fn load_stores(options: &CliOptions) -> VirtResult<ResourceStores> {
    let archive = match &options.archive {
        Some(path) => {
            let image = std::fs::read(path).map_err(|error| {
                VirtError::new(
                    "cli.archive_unreadable",
                    format!("cannot read `{}`: {error}", path.display()),
                )
            })?;
            ArchiveStore::from_zip_bytes(&image)?
        }
        None => ArchiveStore::default(),
    };
    debug!(entries = archive.len(), "archive loaded");

    let vault = options.vault.as_ref().map(|root| {
        let vault: Rc<dyn VaultStore> = Rc::new(DirectoryVault::new(root));
        vault
    });

    let network = FetchClient::new(FetchClientConfig {
        trust_store_mode: options.trust_store_mode,
        ..FetchClientConfig::default()
    })?;

    Ok(ResourceStores {
        archive,
        vault,
        network: Rc::new(network),
    })
}

fn run(options: &CliOptions) -> VirtResult<()> {
    let stores = load_stores(options)?;
    let mut config = SessionConfig {
        host_origin: options.host_origin.clone(),
        root_url: options.root_url.clone(),
        run_scripts: options.run_scripts,
        ..SessionConfig::default()
    };
    config.dark_mode.enabled = options.dark_mode;

    let mut session = VirtualizationSession::new(config, stores);
    let frame = session.render(RenderProps::new(options.url.as_str()))?;
    info!(frames = session.frame_count(), "render finished");

    let tree = session.tree();
    match tree.content_document(frame) {
        Some(document) => println!("{}", vf_html::inner_html(tree, document)),
        None => {
            return Err(VirtError::new(
                "cli.no_content",
                format!("`{}` produced no frame document", options.url),
            ));
        }
    }

    if options.dump_frames {
        for scope in session.scopes() {
            let Some(document) = tree.window_document(scope.window()) else {
                continue;
            };
            let context = scope
                .context()
                .map_or_else(|| "(none)".to_owned(), |url| url.to_string());
            eprintln!("--- frame {} ({context})", scope.window());
            eprintln!("{}", vf_html::inner_html(tree, document));
        }
    }

    print_report(&session);
    Ok(())
}

fn print_report(session: &VirtualizationSession) {
    let record = session.patch_record();
    let mut console_total = 0_u64;
    let mut console_errors = 0_u64;
    let mut messages = 0_usize;
    for scope in session.scopes() {
        console_total = console_total.saturating_add(scope.console().total());
        console_errors = console_errors.saturating_add(scope.console().count("error"));
        messages = messages.saturating_add(scope.messages().len());
    }

    eprintln!("frames patched:     {}", record.frame_count());
    eprintln!("shadow roots:       {}", record.shadow_host_count());
    eprintln!("live frames:        {}", session.frame_count());
    eprintln!("dark-mode engines:  {}", session.live_dark_engines());
    eprintln!("console calls:      {console_total} ({console_errors} errors)");
    eprintln!("posted messages:    {messages}");
    eprintln!("pending work:       {}", session.pending_work());
}
