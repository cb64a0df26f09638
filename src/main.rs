//! WordPress Recon CLI - Fingerprint WordPress sites and test their credentials

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::EnvFilter;

use wordpress_recon::{
    ComponentKind, ProgressObserver, ScanConfig, ScanInputs, Scanner, StopSignal,
    output::{OutputConfig, OutputFormat, OutputSort, output_report},
};

/// WordPress scanner - fingerprints core, plugins, themes and users, looks up
/// known vulnerabilities and tests login credentials
#[derive(Parser, Debug)]
#[command(name = "wordpress-recon")]
#[command(version, about, long_about = None)]
struct Args {
    /// URL of the WordPress site to scan; https:// is assumed when no scheme is given
    url: String,

    /// TOML configuration file; flags override its values
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long = "output", default_value = "human", value_enum)]
    output_format: OutputFormatArg,

    /// Sort order for output
    #[arg(long = "sort", default_value = "type", value_enum)]
    sort: OutputSortArg,

    /// Allow scanning private/internal IP addresses (localhost, 192.168.x.x, etc.)
    #[arg(long = "allow-private")]
    allow_private: bool,

    /// Maximum concurrent requests
    #[arg(short = 't', long = "threads")]
    threads: Option<usize>,

    /// Request timeout in seconds
    #[arg(long = "timeout")]
    timeout: Option<u64>,

    #[arg(long = "user-agent")]
    user_agent: Option<String>,

    /// Proxy URL (http://, https:// or socks5://)
    #[arg(long = "proxy")]
    proxy: Option<String>,

    /// Basic authentication as login:password
    #[arg(long = "basic-auth")]
    basic_auth: Option<String>,

    /// Follow a redirection of the homepage
    #[arg(long = "follow-redirection")]
    follow_redirection: bool,

    /// Scan even if the site does not look like WordPress
    #[arg(long = "force")]
    force: bool,

    /// Continue past missing plugins directory and login protection
    #[arg(short = 'y', long = "yes")]
    confirmed: bool,

    /// Content directory, detected from the homepage when omitted
    #[arg(long = "wp-content-dir")]
    wp_content_dir: Option<String>,

    /// Regex on slugs; matching candidates are not probed
    #[arg(long = "exclude-content")]
    exclude_content: Option<String>,

    /// Regex on response bodies; matching responses count as absent
    #[arg(long = "exclude-body")]
    exclude_body: Option<String>,

    /// Aggressive passes to run
    #[arg(short = 'e', long = "enumerate", value_enum, value_delimiter = ',')]
    enumerate: Vec<EnumerateArg>,

    /// Only report plugins and themes with known vulnerabilities
    #[arg(long = "only-vulnerable")]
    only_vulnerable: bool,

    /// Author IDs probed during user enumeration, as start-end
    #[arg(long = "user-ids", value_parser = parse_id_range)]
    user_ids: Option<(u32, u32)>,

    /// Fingerprint database (JSON)
    #[arg(long = "fingerprints")]
    fingerprints: Option<PathBuf>,

    /// Vulnerability knowledge base (JSON)
    #[arg(long = "knowledge-base")]
    knowledge_base: Option<PathBuf>,

    /// Plugin wordlist
    #[arg(long = "plugins-list")]
    plugins_list: Option<PathBuf>,

    /// Theme wordlist
    #[arg(long = "themes-list")]
    themes_list: Option<PathBuf>,

    /// TimThumb path list
    #[arg(long = "timthumbs-list")]
    timthumbs_list: Option<PathBuf>,

    /// Malware list, one URL regex per line
    #[arg(long = "malwares-list")]
    malwares_list: Option<PathBuf>,

    /// Password list; enables credential testing
    #[arg(short = 'w', long = "wordlist")]
    wordlist: Option<PathBuf>,

    /// Username to test (repeatable); enumerated users are used when omitted
    #[arg(short = 'U', long = "username")]
    usernames: Vec<String>,

    /// Debug logging and report of every failed login
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

/// Output format argument
#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormatArg {
    Human,
    Json,
    None,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Human => OutputFormat::Human,
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::None => OutputFormat::None,
        }
    }
}

/// Output sort argument
#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputSortArg {
    /// Sort by type (Core, Plugin, Theme, Timthumb, User), then by name (default)
    Type,
    /// Sort alphabetically by name only
    Name,
    /// Vulnerable components first, then by type, then by name
    Status,
}

impl From<OutputSortArg> for OutputSort {
    fn from(arg: OutputSortArg) -> Self {
        match arg {
            OutputSortArg::Type => OutputSort::Type,
            OutputSortArg::Name => OutputSort::Name,
            OutputSortArg::Status => OutputSort::Status,
        }
    }
}

/// Aggressive pass argument
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EnumerateArg {
    Plugins,
    Themes,
    Timthumbs,
    Users,
}

fn parse_id_range(s: &str) -> Result<(u32, u32), String> {
    let (start, end) = s
        .split_once('-')
        .ok_or_else(|| format!("'{}' is not a start-end range", s))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|e| format!("'{}': {}", v, e))
    };
    Ok((parse(start)?, parse(end)?))
}

/// Progress bars on stderr, one per pass
struct ProgressBars {
    bar: Mutex<Option<ProgressBar>>,
}

impl ProgressBars {
    fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        let guard = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bar) = guard.as_ref() {
            f(bar);
        }
    }
}

impl ProgressObserver for ProgressBars {
    fn pass_started(&self, kind: ComponentKind, total: usize) {
        let bar = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.set_message(format!("{} pass", kind));
        *self.bar.lock().unwrap_or_else(PoisonError::into_inner) = Some(bar);
    }

    fn probe_finished(&self, _kind: ComponentKind) {
        self.with_bar(|bar| bar.inc(1));
    }

    fn pass_finished(&self, _kind: ComponentKind) {
        if let Some(bar) = self.bar.lock().unwrap_or_else(PoisonError::into_inner).take() {
            bar.finish_and_clear();
        }
    }

    fn login_failed(&self, username: &str, password: &str) {
        self.with_bar(|bar| bar.println(format!("  [-] {} / {}", username, password)));
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose {
        "wordpress_recon=debug"
    } else {
        "wordpress_recon=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Print banner for human output
    if matches!(args.output_format, OutputFormatArg::Human) {
        print_banner();
    }

    let output_config = OutputConfig::new(args.output_format.into(), args.sort.into());

    match run_scan(&args, &output_config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Configuration file values overridden by flags
fn scan_config(args: &Args) -> wordpress_recon::Result<ScanConfig> {
    let mut config = match &args.config {
        Some(path) => ScanConfig::from_toml_file(path)?,
        None => ScanConfig::default(),
    };

    config.allow_private |= args.allow_private;
    config.follow_redirection |= args.follow_redirection;
    config.force |= args.force;
    config.confirmed |= args.confirmed;
    config.verbose |= args.verbose;

    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(user_agent) = &args.user_agent {
        config.user_agent = user_agent.clone();
    }

    let overrides = [
        (&mut config.proxy, &args.proxy),
        (&mut config.basic_auth, &args.basic_auth),
        (&mut config.wp_content_dir, &args.wp_content_dir),
        (&mut config.exclude_content, &args.exclude_content),
        (&mut config.exclude_body, &args.exclude_body),
    ];
    for (slot, value) in overrides {
        if value.is_some() {
            slot.clone_from(value);
        }
    }

    let enumerate = &mut config.enumerate;
    enumerate.plugins |= args.enumerate.contains(&EnumerateArg::Plugins);
    enumerate.themes |= args.enumerate.contains(&EnumerateArg::Themes);
    enumerate.timthumbs |= args.enumerate.contains(&EnumerateArg::Timthumbs);
    enumerate.users |= args.enumerate.contains(&EnumerateArg::Users);
    enumerate.only_vulnerable |= args.only_vulnerable;
    if let Some((start, end)) = args.user_ids {
        enumerate.user_id_start = start;
        enumerate.user_id_end = end;
    }

    let data = &mut config.data;
    let paths = [
        (&mut data.fingerprints, &args.fingerprints),
        (&mut data.knowledge_base, &args.knowledge_base),
        (&mut data.plugins, &args.plugins_list),
        (&mut data.themes, &args.themes_list),
        (&mut data.timthumbs, &args.timthumbs_list),
        (&mut data.passwords, &args.wordlist),
        (&mut data.malwares, &args.malwares_list),
    ];
    for (slot, value) in paths {
        if value.is_some() {
            slot.clone_from(value);
        }
    }

    if !args.usernames.is_empty() {
        config.usernames = args.usernames.clone();
    }

    Ok(config)
}

async fn run_scan(args: &Args, output_config: &OutputConfig) -> wordpress_recon::Result<()> {
    let config = scan_config(args)?;
    let inputs = ScanInputs::load(&config.data, &config.enumerate)?;

    let stop = StopSignal::new();
    let signal = stop.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt(&signal) {
                eprintln!("Error: interrupted twice, exiting");
                std::process::exit(130);
            }
            tracing::warn!("interrupted, finishing requests in flight (Ctrl-C again to exit)");
        }
    });

    let mut builder = Scanner::builder(&args.url)
        .config(config)
        .inputs(inputs)
        .stop_signal(stop);
    if matches!(output_config.format, OutputFormat::Human) {
        builder = builder.observer(Arc::new(ProgressBars::new()));
    }

    let scanner = builder.build()?;
    let report = scanner.scan().await?;

    let stdout = std::io::stdout();
    let mut writer = stdout.lock();
    output_report(&report, output_config, &mut writer)?;

    Ok(())
}

/// Stop the scan; true when it was already stopping
fn interrupt(stop: &StopSignal) -> bool {
    if stop.is_stopped() {
        return true;
    }
    stop.stop();
    false
}

fn print_banner() {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    println!("WordPress Recon v{}", VERSION);
    println!();
}
