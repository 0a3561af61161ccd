use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use color_eyre::{Result, eyre::Context};
use edgeway::{
    ServerConfig, ServerConfigOverrides, ServerHandle,
    adapters::PassThroughHandler,
    config::{ServerConfigValidator, load_config},
    ports::delegated::DelegatedHandler,
    tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(flatten)]
    options: ConfigArgs,
}

#[derive(clap::Args, Debug, Clone, Default)]
struct ConfigArgs {
    /// Configuration file layered between the environment and the flags below
    #[clap(short, long)]
    config: Option<String>,

    /// Port to listen on
    #[clap(short, long)]
    port: Option<u16>,

    /// Directory holding index.html and the static assets
    #[clap(long)]
    public_dir: Option<PathBuf>,

    /// Instance identifier shown in logs
    #[clap(long)]
    id: Option<String>,
}

impl ConfigArgs {
    fn overrides(&self) -> ServerConfigOverrides {
        ServerConfigOverrides {
            id: self.id.clone(),
            port: self.port,
            public_dir: self.public_dir.clone(),
            ..Default::default()
        }
    }
}

#[derive(Parser, Debug)]
enum Commands {
    /// Check the resolved configuration and exit
    Validate {
        #[clap(flatten)]
        options: ConfigArgs,
    },
    /// Start the edge server (default)
    Serve {
        #[clap(flatten)]
        options: ConfigArgs,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { options }) => validate_config_command(&options),
        Some(Commands::Serve { options }) => serve_command(&options).await,
        None => serve_command(&args.options).await,
    }
}

fn resolve_config(options: &ConfigArgs) -> Result<ServerConfig> {
    load_config(options.config.as_deref(), options.overrides()).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            options.config.as_deref().unwrap_or("environment")
        )
    })
}

async fn serve_command(options: &ConfigArgs) -> Result<()> {
    let config = resolve_config(options)?;

    tracing_setup::init_for_environment(config.environment)
        .context("Failed to initialize tracing")?;

    tracing::info!(
        "Starting edgeway #{} ({}) serving {}",
        config.id,
        config.environment.as_str(),
        config.public_dir.display()
    );

    let port = config.port;
    let server = ServerHandle::from_config(config, |config| {
        Arc::new(PassThroughHandler::new(config)) as Arc<dyn DelegatedHandler>
    })
    .context("Failed to build server")?
    .start(port)
    .await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move { shutdown.run_signal_handler().await });

    server.wait().await?;
    tracing::info!("Server stopped");
    Ok(())
}

/// Validate the resolved configuration and exit
fn validate_config_command(options: &ConfigArgs) -> Result<()> {
    println!(
        "🔍 Validating configuration: {}",
        options.config.as_deref().unwrap_or("environment only")
    );

    let config = match resolve_config(options) {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Instance: #{}", config.id);
            println!("   • Port: {}", config.port);
            println!("   • Public Dir: {}", config.public_dir.display());
            println!("   • Environment: {}", config.environment.as_str());
            println!("   • Registry: {}", config.registry_url);
            println!("   • Blacklisted Packages: {}", config.blacklist.len());
            println!("   • Error Monitoring: {}", config.sentry_dsn.is_some());
            println!("   • Idle Timeout: {}s", config.timeout_secs);
            println!("   • Keep-Alive: {}s", config.keep_alive_secs);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure the public directory exists and contains index.html");
            println!("   • Ensure all URLs start with http:// or https://");
            println!("   • Use a non-zero port and timeout");
            std::process::exit(1);
        }
    }
}
