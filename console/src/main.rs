use clap::{Parser, Subcommand};
use console::{Console, FleetFile};
use model::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "console")]
#[command(about = "Manage environments and promote resources between them")]
struct Cli {
    /// Fleet file to load (defaults to the built-in demo fleet)
    #[arg(short, long, global = true)]
    fleet: Option<PathBuf>,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List environments
    Envs,
    /// List resources owned by or deployed into an environment
    Resources {
        environment: String,
        /// Only this kind (workspace, application, data-source, query, user-group)
        #[arg(short, long)]
        kind: Option<ResourceKind>,
    },
    /// Show a workspace and its applications, data sources and queries
    Workspace { workspace: String },
    /// List the environments a resource can be promoted into
    Targets { resource: String },
    /// Promote a resource into another environment
    Promote {
        resource: String,
        target: String,
        /// Keep the target's own configuration
        #[arg(long)]
        no_copy_config: bool,
    },
    /// Promote a workspace and its managed children
    PromoteWorkspace {
        workspace: String,
        target: String,
        #[arg(long)]
        no_copy_config: bool,
    },
    /// Opt a resource in or out of promotion
    SetManaged {
        resource: String,
        #[arg(action = clap::ArgAction::Set)]
        managed: bool,
    },
    /// Delete an environment
    Delete {
        environment: String,
        /// The environment's name, typed exactly
        #[arg(long)]
        confirm: String,
    },
    /// Make an environment the master
    SetMaster { environment: String },
    /// Fetch stats from an environment
    Stats { environment: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let fleet = match &cli.fleet {
        Some(path) => FleetFile::load(path)?,
        None => FleetFile::demo()?,
    };
    let console = Console::new(ConsoleConfig::default())?
        .with_introspector(Arc::new(fleet.introspector()));
    fleet.apply(&console).await?;
    info!("Console ready");

    let options = |no_copy_config: bool| {
        if no_copy_config {
            PromotionOptions::copy_config(false)
        } else {
            console.default_options()
        }
    };

    match cli.command {
        Commands::Envs => {
            let environments = console.list_environments().await;
            emit(cli.json, &environments, |environments| {
                for env in environments {
                    println!(
                        "{:<10} {:<14} {:<12} {:<32} {}{}",
                        env.id.as_str(),
                        env.name,
                        env.stage.to_string(),
                        env.domain,
                        if env.is_master { "master " } else { "" },
                        if env.has_credential { "key" } else { "no key" },
                    );
                }
            })?;
        }
        Commands::Resources { environment, kind } => {
            let resources = console
                .list_resources(&EnvironmentId::new(environment), kind)
                .await?;
            emit(cli.json, &resources, |resources| {
                if resources.is_empty() {
                    println!("No resources.");
                }
                for resource in resources {
                    print_resource(resource);
                }
            })?;
        }
        Commands::Workspace { workspace } => {
            let contents = console
                .workspace_contents(&ResourceId::new(workspace))
                .await?;
            emit(cli.json, &contents, |contents| {
                print_resource(&contents.workspace);
                for (label, children) in [
                    ("Applications", &contents.applications),
                    ("Data sources", &contents.data_sources),
                    ("Queries", &contents.queries),
                ] {
                    println!("\n{}:", label);
                    for child in children {
                        print!("  ");
                        print_resource(child);
                    }
                }
            })?;
        }
        Commands::Targets { resource } => {
            let targets = console
                .deployment_targets(&ResourceId::new(resource))
                .await?;
            emit(cli.json, &targets, |targets| {
                for target in targets {
                    println!(
                        "{:<10} {:<14} {}{}",
                        target.environment.id.as_str(),
                        target.environment.name,
                        if target.ready { "ready" } else { "needs API key" },
                        if target.already_deployed {
                            ", already deployed"
                        } else {
                            ""
                        },
                    );
                }
            })?;
        }
        Commands::Promote {
            resource,
            target,
            no_copy_config,
        } => {
            let record = console
                .promote(
                    &ResourceId::new(resource),
                    &EnvironmentId::new(target),
                    options(no_copy_config),
                )
                .await?;
            emit(cli.json, &record, print_record)?;
        }
        Commands::PromoteWorkspace {
            workspace,
            target,
            no_copy_config,
        } => {
            let records = console
                .promote_workspace(
                    &ResourceId::new(workspace),
                    &EnvironmentId::new(target),
                    options(no_copy_config),
                )
                .await?;
            emit(cli.json, &records, |records| {
                for record in records {
                    print_record(record);
                }
            })?;
        }
        Commands::SetManaged { resource, managed } => {
            let summary = console
                .set_managed(&ResourceId::new(resource), managed)
                .await?;
            emit(cli.json, &summary, print_resource)?;
        }
        Commands::Delete {
            environment,
            confirm,
        } => {
            let deleted = console
                .delete_environment(&EnvironmentId::new(environment), &confirm)
                .await?;
            emit(cli.json, &deleted, |env| {
                println!("Deleted {} ({})", env.name, env.id)
            })?;
        }
        Commands::SetMaster { environment } => {
            let master = console.set_master(&EnvironmentId::new(environment)).await?;
            emit(cli.json, &master, |env| {
                println!("{} ({}) is now the master environment", env.name, env.id)
            })?;
        }
        Commands::Stats { environment } => {
            let stats = console
                .environment_stats(&EnvironmentId::new(environment))
                .await?;
            emit(cli.json, &stats, |stats| {
                println!("Workspaces:      {}", stats.workspaces);
                println!("User groups:     {}", stats.user_groups);
                println!("Total users:     {}", stats.total_users);
                println!("Managed objects: {}", stats.managed_objects);
            })?;
        }
    }

    Ok(())
}

fn emit<T, F>(json: bool, value: &T, human: F) -> Result<(), Box<dyn std::error::Error>>
where
    T: Serialize,
    F: FnOnce(&T),
{
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

fn print_resource(resource: &ResourceSummary) {
    let deployed: Vec<&str> = resource.deployed_to.iter().map(|id| id.as_str()).collect();
    println!(
        "{:<8} {:<12} {:<24} {:<9} deployed to [{}]",
        resource.id.as_str(),
        resource.kind.to_string(),
        resource.name,
        if resource.managed { "managed" } else { "" },
        deployed.join(", "),
    );
}

fn print_record(record: &DeploymentRecord) {
    println!(
        "{} {} -> {}{}{}",
        record.resource_id,
        record.source_environment_id,
        record.target_environment_id,
        if record.copy_config {
            " (with config)"
        } else {
            ""
        },
        if record.newly_deployed {
            ""
        } else {
            " (already deployed)"
        },
    );
}
