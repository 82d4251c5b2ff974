//! # coldrag CLI
//!
//! The `coldrag` binary runs the compliance pipeline, estimates plan costs,
//! renders reports, dispatches agent actions locally, and starts the
//! HTTP/WebSocket/MCP server.
//!
//! ## Usage
//!
//! ```bash
//! coldrag --config ./config/coldrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `coldrag inspect <plan> <output>` | Run the compliance pipeline |
//! | `coldrag cost <plan>` | Per-resource monthly estimate and action summary |
//! | `coldrag report <plan> <html_out>` | Render the plan summary as HTML |
//! | `coldrag render <analysis.json>` | Render a document from an analysis file |
//! | `coldrag agents list` | Show registered agents |
//! | `coldrag agents run <agent> <action>` | Dispatch an agent action locally |
//! | `coldrag tools list` | Show registered tools |
//! | `coldrag serve` | Start the HTTP/WebSocket server |
//! | `coldrag completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Compliance findings against a folder of frameworks
//! coldrag inspect plan.json findings.json --refdir ./frameworks
//!
//! # Live AWS prices, JSON output
//! coldrag cost plan.json --live --format json
//!
//! # Security audit through the agent dispatcher
//! coldrag agents run security_agent audit_security --param plan_json=plan.json
//! ```

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coldrag::agents::{AgentRegistry, Dispatcher};
use coldrag::config::{self, Config, DEFAULT_CONFIG_PATH};
use coldrag::cost::{format_cost, summarize_costs, CostEstimator};
use coldrag::inspect::{run_inspection, summarize, InspectRequest};
use coldrag::llm::create_model;
use coldrag::plan::load_plan;
use coldrag::pricing::AwsPricingClient;
use coldrag::progress::ProgressMode;
use coldrag::report::{load_analysis, plan_summary_html, render_document, DocumentType, OutputFormat};
use coldrag::tools::ToolRegistry;
use coldrag::validate::load_report;

/// coldrag: retrieval-augmented compliance review for Terraform plans.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/coldrag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "coldrag",
    about = "Retrieval-augmented compliance review, cost estimation, and agent dispatch for Terraform plans",
    version,
    long_about = "coldrag indexes a Terraform plan together with compliance reference documents, \
    asks an LLM for structured violations and recommendations, and validates the answer. \
    It also estimates monthly costs, audits plans for security issues, and serves its agents \
    over HTTP, WebSocket and MCP."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file at the default path falls back to built-in defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level when neither COLDRAG_LOG nor RUST_LOG is set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    /// Pipeline progress on stderr. `auto` is human on a TTY, otherwise off.
    #[arg(long, global = true, value_enum, default_value_t = ProgressArg::Auto)]
    progress: ProgressArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CostFormat {
    Text,
    Json,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the compliance pipeline on a plan.
    ///
    /// Writes validated findings to `<output>` and the model's raw answer to
    /// `<output stem>.raw.txt` next to it.
    Inspect {
        /// Terraform plan in `terraform show -json` format.
        plan: PathBuf,
        /// Where to write the findings JSON.
        output: PathBuf,
        /// Directory of reference documents (overrides `references.dir`).
        #[arg(long)]
        refdir: Option<PathBuf>,
        /// Prompt template (overrides `prompts.dir`/`prompts.file`).
        #[arg(long)]
        prompt: Option<PathBuf>,
        /// Question used for retrieval and appended to the prompt.
        #[arg(long)]
        question: Option<String>,
    },

    /// Estimate monthly cost per resource, grouped by plan action.
    Cost {
        plan: PathBuf,
        /// Query the AWS Pricing API (needs AWS credentials in the environment).
        #[arg(long)]
        live: bool,
        /// Region used when a resource carries no region hint.
        #[arg(long)]
        region: Option<String>,
        #[arg(long, value_enum, default_value_t = CostFormat::Text)]
        format: CostFormat,
    },

    /// Render the plan summary (resources, actions, costs) as HTML.
    Report {
        plan: PathBuf,
        html_out: PathBuf,
        /// Findings file from `coldrag inspect` to include as a compliance section.
        #[arg(long)]
        findings: Option<PathBuf>,
        /// Use live AWS prices for the cost column.
        #[arg(long)]
        live: bool,
    },

    /// Render a document from a compliance, security or cost analysis file.
    Render {
        analysis: PathBuf,
        #[arg(long, default_value = "compliance",
              value_parser = ["compliance", "compliance_report", "executive_summary", "technical_report"])]
        kind: String,
        #[arg(long, default_value = "html", value_parser = ["html", "markdown", "json"])]
        format: String,
        /// Write here instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Inspect or run agents.
    Agents {
        #[command(subcommand)]
        action: AgentsAction,
    },

    /// Inspect registered tools.
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },

    /// Start the HTTP/WebSocket server with the MCP endpoint at `/mcp`.
    Serve,

    /// Print shell completions.
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum AgentsAction {
    /// List agents and their actions.
    List,
    /// Dispatch one action and print the JSON result.
    Run {
        agent_id: String,
        action: String,
        /// Action parameters as `key=value`. Values that parse as JSON
        /// (numbers, booleans, arrays) are passed as JSON.
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },
}

#[derive(Subcommand)]
enum ToolsAction {
    /// List tools and their parameters.
    List,
}

/// Parse a `key=value` pair for `--param` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn params_object(params: Vec<(String, String)>) -> Value {
    let mut map = Map::new();
    for (key, raw) in params {
        let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
        map.insert(key, value);
    }
    Value::Object(map)
}

/// Install the global subscriber. `COLDRAG_LOG`, then `RUST_LOG`, then
/// `--log-level` decide the filter.
fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let level: Level = log_level.parse().context("Invalid log level")?;
    let filter = EnvFilter::try_from_env("COLDRAG_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    if json {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_line_number(true),
            )
            .with(filter)
            .init();
    }
    Ok(())
}

fn estimator(cfg: &Config, live: bool, region: Option<String>) -> Result<CostEstimator> {
    let mut pricing = cfg.pricing.clone();
    if let Some(region) = region {
        pricing.region = Some(region);
    }
    if live || pricing.live {
        let client = AwsPricingClient::from_env(&pricing).context("Live pricing unavailable")?;
        Ok(CostEstimator::with_source(&pricing, Arc::new(client)))
    } else {
        Ok(CostEstimator::new(&pricing))
    }
}

fn write_or_print(content: &str, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "coldrag", &mut std::io::stdout());
        return Ok(());
    }

    init_logging(&cli.log_level, cli.log_json)?;
    let cfg = config::load_config(&cli.config)?;
    debug!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Commands::Inspect {
            plan,
            output,
            refdir,
            prompt,
            question,
        } => {
            let llm = create_model(&cfg.llm)?;
            let request = InspectRequest {
                refdir,
                prompt_file: prompt,
                question,
                ..InspectRequest::new(plan, output)
            };
            let reporter = cli.progress.mode().reporter();
            let outcome = run_inspection(&cfg, &request, llm.as_ref(), reporter.as_ref()).await?;
            print!("{}", summarize(&outcome));
        }
        Commands::Cost {
            plan,
            live,
            region,
            format,
        } => {
            let plan = load_plan(&plan)?;
            let estimator = estimator(&cfg, live, region)?;
            let summary = summarize_costs(&plan, &estimator).await;
            match format {
                CostFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                CostFormat::Text => {
                    for (action, group) in &summary.groups {
                        if group.count == 0 {
                            continue;
                        }
                        println!("{} ({}): {}", action.to_uppercase(), group.count, format_cost(group.cost));
                        for resource in &group.resources {
                            println!(
                                "  {:<50} {:<30} {:>12}",
                                resource.address,
                                resource.resource_type,
                                format_cost(resource.monthly_cost)
                            );
                        }
                    }
                    println!(
                        "Estimated monthly cost of new resources: {}",
                        format_cost(summary.total_monthly_cost)
                    );
                }
            }
        }
        Commands::Report {
            plan,
            html_out,
            findings,
            live,
        } => {
            let plan = load_plan(&plan)?;
            let estimator = estimator(&cfg, live, None)?;
            let summary = summarize_costs(&plan, &estimator).await;
            let compliance = findings.as_deref().map(load_report).transpose()?;
            let html = plan_summary_html(&plan, &summary, compliance.as_ref());
            write_or_print(&html, Some(&html_out))?;
        }
        Commands::Render {
            analysis,
            kind,
            format,
            output,
        } => {
            let kind = if kind == "compliance" {
                "compliance_report"
            } else {
                kind.as_str()
            };
            let data = load_analysis(&analysis)?;
            let rendered = render_document(&data, DocumentType::parse(kind)?, OutputFormat::parse(&format)?)?;
            write_or_print(&rendered, output.as_ref())?;
        }
        Commands::Agents { action } => match action {
            AgentsAction::List => {
                for agent in AgentRegistry::with_builtins().info() {
                    println!("{}  {}", agent.agent_id, agent.name);
                    println!("    {}", agent.description);
                    for action in &agent.available_actions {
                        println!("    - {}: {}", action.name, action.description);
                    }
                    println!("    tools: {}", agent.tools.join(", "));
                }
            }
            AgentsAction::Run {
                agent_id,
                action,
                params,
            } => {
                let llm = create_model(&cfg.llm)?;
                let dispatcher = Dispatcher::with_builtins(Arc::new(cfg), llm);
                let result = dispatcher
                    .execute(&agent_id, &action, params_object(params))
                    .await?;
                println!("{}", serde_json::to_string_pretty(&result)?);
                if result["status"] == "error" {
                    bail!("{} {} failed", agent_id, action);
                }
            }
        },
        Commands::Tools { action } => match action {
            ToolsAction::List => {
                for tool in ToolRegistry::with_builtins().info() {
                    println!("{}  {}", tool.tool_id, tool.name);
                    println!("    {}", tool.description);
                    for p in &tool.parameters {
                        let marker = if p.required { "*" } else { " " };
                        println!("    {}{} ({}): {}", marker, p.name, p.param_type, p.description);
                    }
                }
            }
        },
        Commands::Serve => {
            let llm = create_model(&cfg.llm)?;
            coldrag::server::run_server(&cfg, llm).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
