//! uia-inspect
//!
//! Fetches a UI tree with a cache request built from the command line and
//! prints what was cached as JSON.
//!
//! Usage from workspace root:
//!   cargo run --bin uia-inspect -- --fixture tree.json --property Name --scope subtree
//!   cargo run --bin uia-inspect -- --fixture tree.json --focused --pattern Value
//!   cargo run --bin uia-inspect -- --property Name --scope children   # live desktop (Windows)

use anyhow::{anyhow, Context, Result};
use automation_client::platforms::memory::InMemoryProvider;
use automation_client::{
    Automation, AutomationElementMode, AutomationPattern, AutomationProperty, CacheRequest,
    Condition, TreeDumpConfig, TreeScope,
};
use clap::{Parser, ValueEnum};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
#[clap(rename_all = "lower")]
enum Scope {
    #[default]
    Element,
    Children,
    Descendants,
    Subtree,
}

impl From<Scope> for TreeScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Element => TreeScope::ELEMENT,
            Scope::Children => TreeScope::ELEMENT | TreeScope::CHILDREN,
            Scope::Descendants => TreeScope::ELEMENT | TreeScope::DESCENDANTS,
            Scope::Subtree => TreeScope::SUBTREE,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
#[clap(rename_all = "lower")]
enum View {
    Raw,
    #[default]
    Control,
    Content,
}

impl From<View> for Condition {
    fn from(view: View) -> Self {
        match view {
            View::Raw => Condition::raw_view(),
            View::Control => Condition::control_view(),
            View::Content => Condition::content_view(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "uia-inspect")]
#[command(about = "Inspect a UI tree through a cache request")]
struct Cli {
    /// UI tree fixture (JSON). Without it the platform's live tree is used.
    #[clap(long, short = 'f', env = "UIA_INSPECT_FIXTURE")]
    fixture: Option<PathBuf>,

    /// Property to cache, by programmatic name (e.g. Name, AutomationId). Repeatable.
    #[clap(long = "property", short = 'p')]
    properties: Vec<String>,

    /// Pattern to cache, by programmatic name (e.g. Invoke, Value). Repeatable.
    #[clap(long = "pattern")]
    patterns: Vec<String>,

    /// How much of the tree to fetch around the start element
    #[clap(long, value_enum, default_value_t = Scope::Element)]
    scope: Scope,

    /// Which view of the tree the fetch walks
    #[clap(long, value_enum, default_value_t = View::Control)]
    view: View,

    /// Start from the focused element instead of the desktop root
    #[clap(long)]
    focused: bool,

    /// Cache values only, without live element references
    #[clap(long)]
    snapshot_only: bool,

    /// Dump options (JSON with max_depth / include_unsupported)
    #[clap(long)]
    dump_config: Option<PathBuf>,

    /// Stop printing below this depth; overrides the dump config
    #[clap(long)]
    max_depth: Option<usize>,

    /// Verbose output
    #[clap(long, short)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    let default = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn build_request(cli: &Cli) -> Result<CacheRequest> {
    let request = CacheRequest::new();
    for name in &cli.properties {
        let property = AutomationProperty::lookup_name(name)
            .ok_or_else(|| anyhow!("unknown property '{name}'"))?;
        request.add_property(property)?;
    }
    for name in &cli.patterns {
        let pattern = AutomationPattern::lookup_name(name)
            .ok_or_else(|| anyhow!("unknown pattern '{name}'"))?;
        request.add_pattern(pattern)?;
    }
    request.set_tree_scope(cli.scope.into())?;
    request.set_tree_filter(Condition::from(cli.view))?;
    if cli.snapshot_only {
        request.set_automation_element_mode(AutomationElementMode::None)?;
    }
    Ok(request)
}

fn load_dump_config(cli: &Cli) -> Result<TreeDumpConfig> {
    let mut config = match &cli.dump_config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read dump config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid dump config {}", path.display()))?
        }
        None => TreeDumpConfig::default(),
    };
    if cli.max_depth.is_some() {
        config.max_depth = cli.max_depth;
    }
    Ok(config)
}

fn connect(cli: &Cli) -> Result<Automation> {
    match &cli.fixture {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Failed to read fixture {}", path.display()))?;
            let provider = InMemoryProvider::from_json(&json)
                .with_context(|| format!("Invalid fixture {}", path.display()))?;
            info!(fixture = %path.display(), "loaded UI tree fixture");
            Ok(Automation::new(Arc::new(provider)))
        }
        None => Automation::new_default().context("No fixture given and no live UI available"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let automation = connect(&cli)?;
    let request = build_request(&cli)?;
    let config = load_dump_config(&cli)?;
    debug!(?request, ?config, "fetching");

    let snapshot = request.snapshot();
    let element = if cli.focused {
        automation.focused_element_build_cache(&snapshot)?
    } else {
        automation.root_element_build_cache(&snapshot)?
    };

    let json = element
        .to_node(&config)
        .to_json()
        .context("Failed to serialize cached tree")?;
    println!("{json}");
    Ok(())
}
