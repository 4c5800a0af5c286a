//! Inspection CLI: split → (boundaries) | decode → (re-encoded JSON) | codec → (compiled artifact)
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;

use json_tdc::resource::{FileResource, Resource};
use json_tdc::splitter::{split_dict, split_list};
use json_tdc::{Config, Registry, Serializer};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// compile type-directed JSON codecs and inspect how inputs are split and decoded
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,

    /// persist compiled codecs under this directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// print the member boundaries of a top-level list or dict
    Split(SplitOut),
    /// decode inputs against a type and print them re-encoded
    Decode(DecodeOut),
    /// print the compiled encoder or decode plan of a type
    Codec(CodecOut),
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(Args, Debug, Clone)]
struct SchemaSettings {
    /// JSON file with `classes` and `enums` definitions
    #[arg(long)]
    registry: PathBuf,

    /// type to compile, e.g. `list<Dummy>`
    #[arg(long = "type")]
    ty: String,

    /// JSON file with serializer options (camelCase keys)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    List,
    Dict,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionArg {
    Encode,
    Decode,
}

#[derive(clap::Parser, Debug)]
struct SplitOut {
    #[command(flatten)]
    input_settings: InputSettings,

    /// container expected at the top level
    #[arg(long, value_enum, default_value_t = Container::List)]
    container: Container,
}

#[derive(clap::Parser, Debug)]
struct DecodeOut {
    #[command(flatten)]
    input_settings: InputSettings,

    #[command(flatten)]
    schema: SchemaSettings,

    /// decode lazily and resolve while re-encoding
    #[arg(long)]
    lazy: bool,

    /// keep going past element errors and report them
    #[arg(long)]
    collect_errors: bool,
}

#[derive(clap::Parser, Debug)]
struct CodecOut {
    #[command(flatten)]
    schema: SchemaSettings,

    #[arg(long, value_enum, default_value_t = DirectionArg::Encode)]
    direction: DirectionArg,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl InputSettings {
    fn paths(&self) -> Result<Vec<PathBuf>> {
        resolve_file_path_patterns(&self.input)
    }
}

impl SchemaSettings {
    fn load(&self, cache_dir: Option<&Path>) -> Result<(Serializer, Config)> {
        let source = std::fs::read_to_string(&self.registry)
            .with_context(|| format!("failed to read registry {}", self.registry.display()))?;
        let registry = Registry::from_json_str(&source)
            .with_context(|| format!("invalid registry {}", self.registry.display()))?;
        let config = match self.config.as_ref() {
            None => Config::default(),
            Some(path) => {
                let source = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                Config::from_json_str(&source).with_context(|| format!("invalid config {}", path.display()))?
            }
        };
        let serializer = match cache_dir {
            Some(dir) => Serializer::new(registry).with_cache_dir(dir),
            None => Serializer::new(registry),
        };
        Ok((serializer, config))
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> Result<()> {
        match &self.cmd {
            Command::Split(target) => {
                for path in target.input_settings.paths()? {
                    let resource = FileResource::open(&path)
                        .with_context(|| format!("failed to open {}", path.display()))?;
                    println!("{}", path.display().to_string().bold());
                    split_one(&resource, target.container)?;
                }
                Ok(())
            }
            Command::Decode(target) => {
                let (serializer, config) = target.schema.load(self.cache_dir.as_deref())?;
                let config = config.with_lazy(target.lazy).with_collect_errors(target.collect_errors);
                let ty = serializer.resolve(&target.schema.ty)?;
                for path in target.input_settings.paths()? {
                    let resource: Rc<dyn Resource> = Rc::new(
                        FileResource::open(&path).with_context(|| format!("failed to open {}", path.display()))?,
                    );
                    let outcome = serializer
                        .decode(resource, &ty, &config)
                        .with_context(|| format!("failed to decode {}", path.display()))?;
                    for error in &outcome.errors {
                        eprintln!("{} {}: {error}", "error".red().bold(), path.display());
                    }
                    println!("{}", serializer.encode(&outcome.value, &ty, &config)?);
                }
                Ok(())
            }
            Command::Codec(target) => {
                let (serializer, config) = target.schema.load(self.cache_dir.as_deref())?;
                let ty = serializer.resolve(&target.schema.ty)?;
                let artifact = match target.direction {
                    DirectionArg::Encode => serializer.encoder(&ty, &config)?,
                    DirectionArg::Decode => serializer.decoder(&ty, &config)?,
                };
                let rendered = serde_json::to_string_pretty(&*artifact)?;
                match target.out.as_ref() {
                    Some(out) => {
                        if let Some(parent) = out.parent() {
                            std::fs::create_dir_all(parent)?;
                        }
                        std::fs::write(out, &rendered)?;
                        eprintln!("{} {}", "wrote".green(), out.display());
                    }
                    None => println!("{rendered}"),
                }
                Ok(())
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn split_one(resource: &dyn Resource, container: Container) -> Result<()> {
    let report = |label: String, item: json_tdc::Result<json_tdc::splitter::Boundary>| match item {
        Ok(b) => println!("  {label} offset={} length={}", b.offset, b.length),
        Err(error) => println!("  {label} {}", error.to_string().red()),
    };
    match container {
        Container::List => {
            for (index, item) in split_list(resource, 0, None)?.enumerate() {
                report(format!("[{index}]"), item);
            }
        }
        Container::Dict => {
            for item in split_dict(resource, 0, None)? {
                match item {
                    Ok((key, boundary)) => report(format!("{key:?}"), Ok(boundary)),
                    Err(error) => report("?".to_string(), Err(error)),
                }
            }
        }
    }
    Ok(())
}

fn resolve_file_path_patterns<I>(patterns: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();
    for raw in patterns {
        let pattern = raw.as_ref();
        if !has_glob_chars(pattern) {
            out.push(PathBuf::from(pattern));
            continue;
        }
        let mut matched_any = false;
        for entry in glob::glob(pattern)? {
            out.push(entry?);
            matched_any = true;
        }
        if !matched_any {
            return Err(anyhow!("glob pattern matched no files: {pattern}"));
        }
    }
    Ok(out)
}
