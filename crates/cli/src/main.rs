use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use s3vh_core::{CallbackContext, ConfigurationDocument, HookConfiguration, HookInvocationPoint, HookPayload, ProgressEvent};
use s3vh_cfn as cfn;

#[derive(Parser, Debug)]
#[command(author, version, about="s3vh — S3 bucket versioning pre-provision hook")]
struct Cli {
    /// Type configuration (YAML or JSON; bare properties or registry document)
    #[arg(long="type-config", global = true)]
    type_config: Option<PathBuf>,

    /// Comma-separated bucket-name prefixes; overrides the type configuration
    #[arg(long, global = true)]
    excluded_bucket_suffixes: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum Point { Create, Update, Delete }

impl From<Point> for HookInvocationPoint {
    fn from(p: Point) -> Self {
        match p {
            Point::Create => HookInvocationPoint::CreatePreProvision,
            Point::Update => HookInvocationPoint::UpdatePreProvision,
            Point::Delete => HookInvocationPoint::DeletePreProvision,
        }
    }
}

#[derive(Subcommand, Debug)] enum Cmd {
    /// Run one handler over a hook payload and print the progress event
    Invoke {
        /// Payload file, or - for stdin
        #[arg(short='p', long, default_value="-")] payload: PathBuf,
        /// Overrides hookContext.invocationPoint
        #[arg(long, value_enum)] point: Option<Point>,
    },
    /// Run the create handler over every S3 bucket in a CloudFormation template
    CheckTemplate {
        #[arg(short='t', long)] template: PathBuf,
    },
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf).context("read stdin")?;
        return Ok(buf);
    }
    std::fs::read(path).with_context(|| format!("read {}", path.display()))
}

fn load_config(path: &Path) -> Result<HookConfiguration> {
    let doc: ConfigurationDocument = serde_yaml::from_slice(&read_input(path)?)
        .with_context(|| format!("parse type configuration {}", path.display()))?;
    Ok(doc.into())
}

/// File beats payload; the flag beats both.
fn resolve_config(cli: &Cli, payload: Option<&HookPayload>) -> Result<HookConfiguration> {
    let mut cfg = match (&cli.type_config, payload.and_then(|p| p.type_configuration.clone())) {
        (Some(p), _) => load_config(p)?,
        (None, Some(properties)) => HookConfiguration { properties, ..Default::default() },
        (None, None) => HookConfiguration::default(),
    };
    if let Some(list) = &cli.excluded_bucket_suffixes {
        cfg.properties.excluded_bucket_suffixes = Some(list.clone());
    }
    Ok(cfg)
}

fn print_json<T: serde::Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let hook = cfn::build_hook();

    match &cli.cmd {
      Cmd::Invoke { payload, point } => {
          let payload: HookPayload = serde_json::from_slice(&read_input(payload)?)
              .context("parse hook payload")?;
          let cfg = resolve_config(&cli, Some(&payload))?;
          let point = point.map(HookInvocationPoint::from)
              .or(payload.request.hook_context.invocation_point)
              .context("no invocation point: pass --point or set hookContext.invocationPoint")?;

          let event = if cfg.enabled() {
              let callback_context = payload.callback_context.clone().unwrap_or_else(CallbackContext::new);
              hook.invoke(point, &payload.request, &callback_context, &cfg.properties)
          } else {
              info!("hook disabled by TargetStacks=NONE");
              ProgressEvent::success("")
          };
          print_json(&event)?;
      },
      Cmd::CheckTemplate { template } => {
          let cfg = resolve_config(&cli, None)?;
          let tpl = cfn::CfnTemplate::load(template)?;
          let report = cfn::check_template(&hook, &tpl, &cfg);
          print_json(&report)?;
          if report.blocks_provisioning() {
              anyhow::bail!("{} resource(s) rejected by {}", report.failed().count(), cfn::TYPE_NAME);
          }
      },
    }
    Ok(())
}
