use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::io::{self, Write};
use std::path::PathBuf;
use toolhub_config::{HubConfig, McpServersConfig, ServerConfigStore};
use toolhub_core::ToolCallOutcome;
use toolhub_mcp::McpManager;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "toolhub")]
#[command(about = "Connect to many MCP tool servers and drive their tools", long_about = None)]
struct Cli {
    /// Hub settings (timeouts, health monitor)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// MCP servers document; overrides `servers_file` from the settings
    #[arg(short, long, value_name = "FILE")]
    servers: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured servers
    Servers,

    /// Print a sample servers document
    SampleConfig,

    /// Validate the servers document
    Validate,

    /// Show one server's configuration
    ShowServer { name: String },

    /// Add a server to the servers document
    AddServer {
        name: String,

        /// Executable to launch
        #[arg(long)]
        command: String,

        /// Argument to pass; repeat for several
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Environment entry as KEY=VALUE; repeat for several
        #[arg(long = "env")]
        env: Vec<String>,

        /// Add the server in disabled state
        #[arg(long, action = clap::ArgAction::SetTrue)]
        disabled: bool,

        /// Replace an existing entry of the same name
        #[arg(long, action = clap::ArgAction::SetTrue)]
        replace: bool,
    },

    /// Remove a server from the servers document
    RemoveServer { name: String },

    /// Replace the whole servers document with the contents of a file
    ImportConfig { file: PathBuf },

    /// Connect all enabled servers and list their tools
    Tools,

    /// Connect all enabled servers and print the active function declarations
    Declarations,

    /// Connect all enabled servers and invoke one tool
    Call {
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Interactive session against all enabled servers
    Shell,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let config_path = cli.config.unwrap_or_else(HubConfig::default_config_path);
    let mut config = HubConfig::load_or_default(&config_path)?;
    if let Some(servers) = cli.servers {
        config.servers_file = servers;
    }
    info!("Using servers document: {}", config.servers_file.display());

    match cli.command {
        Commands::Servers => list_servers(&config)?,
        Commands::SampleConfig => {
            println!("{}", McpServersConfig::sample().to_pretty_json()?);
        }
        Commands::Validate => validate(&config)?,
        Commands::ShowServer { name } => {
            let store = ServerConfigStore::open(&config.servers_file)?;
            let Some(server) = store.get_server(&name) else {
                bail!("Server '{}' is not configured", name);
            };
            println!("{}", serde_json::to_string_pretty(server)?);
        }
        Commands::AddServer {
            name,
            command,
            args,
            env,
            disabled,
            replace,
        } => {
            let entry = server_entry(command, args, env, disabled)?;
            let mut store = ServerConfigStore::open(&config.servers_file)?;
            if replace && store.get_server(&name).is_some() {
                store.update_server(&name, entry)?;
                println!("Updated server '{}'", name);
            } else {
                store.add_server(&name, entry)?;
                println!("Added server '{}'", name);
            }
        }
        Commands::RemoveServer { name } => {
            let mut store = ServerConfigStore::open(&config.servers_file)?;
            store.remove_server(&name)?;
            println!("Removed server '{}'", name);
        }
        Commands::ImportConfig { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let mut store = ServerConfigStore::open(&config.servers_file)?;
            store.set_raw_config(&content)?;
            println!(
                "Imported {} servers into {}",
                store.servers().len(),
                store.path().display()
            );
        }
        Commands::Tools => {
            let manager = connect_all(&config).await?;
            print_tools(&manager).await;
            print_status(&manager).await?;
            manager.cleanup().await;
        }
        Commands::Declarations => {
            let manager = connect_all(&config).await?;
            let declarations = manager.active_declarations().await;
            println!("{}", serde_json::to_string_pretty(&declarations)?);
            manager.cleanup().await;
        }
        Commands::Call { tool, args } => {
            let arguments: Value =
                serde_json::from_str(&args).context("--args must be a JSON object")?;
            let manager = connect_all(&config).await?;
            let outcome = manager.execute(&tool, arguments).await;
            print_outcome(&outcome);
            manager.cleanup().await;
            if !outcome.is_success() {
                std::process::exit(1);
            }
        }
        Commands::Shell => {
            let manager = connect_all(&config).await?;
            if config.monitor.enabled {
                manager.start_monitoring();
            }
            let result = shell(&manager).await;
            manager.cleanup().await;
            result?;
        }
    }

    Ok(())
}

fn server_entry(
    command: String,
    args: Vec<String>,
    env: Vec<String>,
    disabled: bool,
) -> Result<Value> {
    let mut entry = Map::new();
    entry.insert("command".into(), json!(command));
    entry.insert("args".into(), json!(args));

    if !env.is_empty() {
        let mut vars = Map::new();
        for pair in env {
            let Some((key, value)) = pair.split_once('=') else {
                bail!("--env expects KEY=VALUE, got '{}'", pair);
            };
            vars.insert(key.to_string(), json!(value));
        }
        entry.insert("env".into(), Value::Object(vars));
    }
    if disabled {
        entry.insert("disabled".into(), json!(true));
    }
    Ok(Value::Object(entry))
}

fn list_servers(config: &HubConfig) -> Result<()> {
    let store = ServerConfigStore::open(&config.servers_file)?;

    println!("\nConfigured MCP servers ({})", store.path().display());
    println!("═══════════════════════════════════════");
    if store.servers().is_empty() {
        println!("  (none)");
    }
    for (name, entry) in store.servers() {
        let command = entry.get("command").and_then(Value::as_str).unwrap_or("?");
        let args: Vec<&str> = entry
            .get("args")
            .and_then(Value::as_array)
            .map(|args| args.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let disabled = toolhub_config::servers::is_disabled(entry);

        println!(
            "  {}{}: {} {}",
            name,
            if disabled { " [disabled]" } else { "" },
            command,
            args.join(" ")
        );
    }
    println!();
    Ok(())
}

fn validate(config: &HubConfig) -> Result<()> {
    let path = &config.servers_file;
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let servers = McpServersConfig::parse_strict(&content)?;
    println!(
        "{} is valid: {} servers, {} enabled",
        path.display(),
        servers.mcp_servers.len(),
        servers.enabled_servers().len()
    );
    Ok(())
}

async fn connect_all(config: &HubConfig) -> Result<McpManager> {
    let store = ServerConfigStore::open(&config.servers_file)?;
    let manager = McpManager::new(config);

    let report = manager.connect_all(store.config()).await;
    for (name, error) in &report.failed {
        eprintln!("⚠️  {}: {}", name, error);
    }
    Ok(manager)
}

async fn print_tools(manager: &McpManager) {
    println!("\n🛠️  Available Tools:");
    println!("═══════════════════════════════════════");

    let tools = manager.list_tools().await;
    if tools.is_empty() {
        println!("  (none)");
    }
    for tool in tools {
        println!(
            "\n📦 {} [{}] ({})",
            tool.name,
            tool.server,
            if tool.enabled { "enabled" } else { "disabled" }
        );
        if !tool.description.is_empty() {
            println!("   {}", tool.description);
        }
    }
    println!();
}

async fn print_status(manager: &McpManager) -> Result<()> {
    let status = manager.server_status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn print_outcome(outcome: &ToolCallOutcome) {
    println!("Status: {}", outcome.status);
    if let Some(content) = &outcome.content {
        println!("{}", content);
    }
    if let Some(error) = &outcome.error {
        println!("Error: {}", error);
    }
}

async fn shell(manager: &McpManager) -> Result<()> {
    println!("🔌 toolhub shell");
    println!("Commands: tools, status, enable <tool>, disable <tool>, call <tool> [json],");
    println!("          disconnect <server>, declarations, health, quit");
    println!("═══════════════════════════════════════\n");

    loop {
        print!("toolhub> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let (command, rest) = input.split_once(' ').unwrap_or((input, ""));
        let rest = rest.trim();

        match command {
            "quit" | "exit" => break,
            "tools" => print_tools(manager).await,
            "status" => print_status(manager).await?,
            "declarations" => {
                let declarations = manager.active_declarations().await;
                println!("{}", serde_json::to_string_pretty(&declarations)?);
            }
            "health" => {
                for (server, healthy) in manager.check_health().await {
                    println!("  {}: {}", server, if healthy { "ok" } else { "failing" });
                }
            }
            "enable" | "disable" if !rest.is_empty() => {
                if !manager.toggle_tool(rest, command == "enable").await {
                    println!("Unknown tool '{}'", rest);
                }
            }
            "disconnect" if !rest.is_empty() => {
                if !manager.disconnect(rest).await {
                    println!("Server '{}' is not connected", rest);
                }
            }
            "call" if !rest.is_empty() => {
                let (tool, args) = rest.split_once(' ').unwrap_or((rest, "{}"));
                match serde_json::from_str::<Value>(args.trim()) {
                    Ok(arguments) => print_outcome(&manager.execute(tool, arguments).await),
                    Err(e) => println!("Invalid JSON arguments: {}", e),
                }
            }
            _ => println!("Unrecognized command: {}", input),
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose { "debug" } else { "info" };

    // Logs go to stderr so stdout carries only command output.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    Ok(())
}
