// sprig 命令行：静态校验与查看组件定义文件

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sprig::beans::graph;
use sprig::beans::{Definition, DependencyRef};
use sprig::config::{ConfigLoader, SprigConfig};
use sprig::logging::{init_logging, LoggingConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sprig")]
#[command(version, about = "sprig - 组件定义文件的校验与查看工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 详细输出
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// 校验定义文件：悬空引用、重复 id、无法解决的循环依赖
    Validate {
        /// 定义文件路径 (TOML)
        file: PathBuf,
    },
    /// 按注册顺序列出定义
    Describe {
        /// 定义文件路径 (TOML)
        file: PathBuf,
    },
}

fn load(file: &PathBuf) -> Result<SprigConfig> {
    ConfigLoader::new()
        .load_from_path(file)
        .with_context(|| format!("无法加载定义文件 {}", file.display()))
}

fn setup_logging(config: &SprigConfig, verbose: bool) -> Result<()> {
    let mut logging = LoggingConfig::from_settings(&config.logging)?;
    if verbose {
        logging.level = tracing::Level::DEBUG;
    }
    init_logging(logging).map_err(|e| anyhow::anyhow!(e))
}

fn validate(config: &SprigConfig) -> Result<bool> {
    let definitions: Vec<Arc<Definition>> = config.definitions()?.into_iter().map(Arc::new).collect();
    let report = graph::validate(&definitions, config.container.allow_circular_references);

    println!(
        "{} definitions, {} references, {} issues",
        report.definitions,
        report.references,
        report.issues.len()
    );
    for issue in &report.issues {
        println!("  - {}", issue);
    }
    Ok(report.is_valid())
}

fn describe_dependency(dependency: &DependencyRef) -> String {
    match dependency {
        DependencyRef::Literal(value) => format!("{:?}", value),
        DependencyRef::Reference(id) => format!("ref {}", id),
        DependencyRef::Autowire(capability) => format!("autowire {}", capability),
    }
}

fn describe(config: &SprigConfig, verbose: bool) -> Result<()> {
    for definition in config.definitions()? {
        let mut flags = vec![format!("{:?}", definition.scope()).to_lowercase()];
        if definition.is_lazy() {
            flags.push("lazy".to_string());
        }
        if definition.is_primary() {
            flags.push("primary".to_string());
        }
        if definition.is_interception_eligible() {
            flags.push(match definition.advisor_chain() {
                Some(chain) => format!("intercepted by '{}'", chain),
                None => "intercepted".to_string(),
            });
        }
        println!("{} : {} [{}]", definition.id(), definition.type_ref(), flags.join(", "));

        if let Some(factory) = definition.factory_method() {
            match &factory.factory_bean {
                Some(bean) => println!("    factory: {}.{}()", bean, factory.name),
                None => println!("    factory: {}::{}()", definition.type_ref(), factory.name),
            }
        }
        if verbose {
            for binding in definition.bindings() {
                println!("    {} <- {}", binding.target, describe_dependency(&binding.dependency));
            }
            if let Some(source) = definition.source() {
                println!("    defined in {}", source);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => {
            let config = load(&file)?;
            setup_logging(&config, cli.verbose)?;
            if !validate(&config)? {
                std::process::exit(1);
            }
        }
        Commands::Describe { file } => {
            let config = load(&file)?;
            setup_logging(&config, cli.verbose)?;
            describe(&config, cli.verbose)?;
        }
    }

    Ok(())
}
