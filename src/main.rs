use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use memwalk::config::{validate_config, Config, ConfigLoader};
use memwalk::walk::{
    self, AreaReport, Direction, IntrusiveList, IntrusiveSet, PoolTreeWalker, RefList,
    SlicePoolInspector, UnorderedSet,
};
use memwalk::{Address, MemoryView, ProcessMemory, SnapshotMemory, Target, TypeRegistry, TypedValue};

const USAGE: &str = "\
usage: memwalk (--pid PID | --snapshot FILE) [--layout FILE] [--config FILE] [--json] COMMAND ARGS

commands:
  list EXPR [--reverse] [--hook FIELD]    elements of an intrusive list
  set EXPR [--hook FIELD]                 elements of an intrusive set, in order
  unordered-set EXPR [--hook FIELD] [--buckets N]
                                          elements of an unordered set, by bucket
  pool-tree EXPR                          a pool and all its descendants
  pool-children EXPR                      direct children of a pool
  pool-stats EXPR                         sizes of a pool or SlicePool
  pool-refs EXPR                          reference log of a pool
  pool-allocations EXPR                   allocation records of a pool
  find-pool EXPR NAME                     pools below EXPR named NAME
  recycler [EXPR]                         pool recycler contents (default: recycler)
  slice-areas EXPR                        allocated slices of a SlicePool
  capture OUTPUT BASE:LEN...              copy ranges into a snapshot file";

/// Where memory is read from
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Pid(u32),
    Snapshot(PathBuf),
}

/// Commands that walk containers through a layout
#[derive(Debug, Clone, PartialEq, Eq)]
enum Walk {
    List {
        expr: String,
        reverse: bool,
        hook: Option<String>,
    },
    Set {
        expr: String,
        hook: Option<String>,
    },
    UnorderedSet {
        expr: String,
        hook: Option<String>,
        buckets: Option<u64>,
    },
    PoolTree(String),
    PoolChildren(String),
    PoolStats(String),
    PoolRefs(String),
    PoolAllocations(String),
    FindPool {
        expr: String,
        name: String,
    },
    Recycler(String),
    SliceAreas(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Walk(Walk),
    /// Copies memory into a snapshot file; needs no layout
    Capture {
        output: PathBuf,
        ranges: Vec<(Address, usize)>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Options {
    source: Source,
    layout: Option<PathBuf>,
    config: Option<PathBuf>,
    json: bool,
    command: Command,
}

fn flag_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .with_context(|| format!("{} needs a value", flag))
}

fn parse_range(arg: &str) -> Result<(Address, usize)> {
    let (base, len) = arg
        .split_once(':')
        .with_context(|| format!("range '{}' is not BASE:LEN", arg))?;
    let base = Address::from_str(base)?;
    let len = match len.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => len.parse(),
    }
    .with_context(|| format!("bad length in range '{}'", arg))?;
    Ok((base, len))
}

/// Parses the command line; `None` when only help or the version was asked
/// for
fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Option<Options>> {
    let mut args = args.into_iter();
    let mut source = None;
    let mut layout = None;
    let mut config = None;
    let mut json = false;
    let mut reverse = false;
    let mut hook = None;
    let mut buckets = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                println!("{}", USAGE);
                return Ok(None);
            }
            "-V" | "--version" => {
                println!("memwalk {}", memwalk::VERSION);
                return Ok(None);
            }
            "--pid" => {
                let pid = flag_value(&mut args, "--pid")?;
                let pid = pid.parse().with_context(|| format!("bad pid '{}'", pid))?;
                source = Some(Source::Pid(pid));
            }
            "--snapshot" => source = Some(Source::Snapshot(flag_value(&mut args, "--snapshot")?.into())),
            "--layout" => layout = Some(flag_value(&mut args, "--layout")?.into()),
            "--config" => config = Some(flag_value(&mut args, "--config")?.into()),
            "--json" => json = true,
            "--reverse" => reverse = true,
            "--hook" => hook = Some(flag_value(&mut args, "--hook")?),
            "--buckets" => {
                let n = flag_value(&mut args, "--buckets")?;
                buckets = Some(n.parse().with_context(|| format!("bad bucket count '{}'", n))?);
            }
            flag if flag.starts_with("--") => bail!("unknown option '{}'\n\n{}", flag, USAGE),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let name = positional.next().context(USAGE)?;
    let rest: Vec<String> = positional.collect();

    let command = match name.as_str() {
        "capture" => match rest.split_first() {
            Some((output, ranges)) if !ranges.is_empty() => Command::Capture {
                output: output.into(),
                ranges: ranges.iter().map(|r| parse_range(r)).collect::<Result<_>>()?,
            },
            _ => bail!("usage: capture OUTPUT BASE:LEN..."),
        },
        _ => Command::Walk(parse_walk(&name, &rest, reverse, hook, buckets)?),
    };

    let source = source.context("one of --pid or --snapshot is required")?;
    Ok(Some(Options {
        source,
        layout,
        config,
        json,
        command,
    }))
}

fn parse_walk(
    name: &str,
    rest: &[String],
    reverse: bool,
    hook: Option<String>,
    buckets: Option<u64>,
) -> Result<Walk> {
    let one = || -> Result<String> {
        match rest {
            [expr] => Ok(expr.clone()),
            _ => bail!("'{}' takes exactly one expression", name),
        }
    };

    Ok(match name {
        "list" => Walk::List {
            expr: one()?,
            reverse,
            hook,
        },
        "set" => Walk::Set { expr: one()?, hook },
        "unordered-set" => Walk::UnorderedSet {
            expr: one()?,
            hook,
            buckets,
        },
        "pool-tree" => Walk::PoolTree(one()?),
        "pool-children" => Walk::PoolChildren(one()?),
        "pool-stats" => Walk::PoolStats(one()?),
        "pool-refs" => Walk::PoolRefs(one()?),
        "pool-allocations" => Walk::PoolAllocations(one()?),
        "find-pool" => match rest {
            [expr, pool_name] => Walk::FindPool {
                expr: expr.clone(),
                name: pool_name.clone(),
            },
            _ => bail!("usage: find-pool EXPR NAME"),
        },
        "recycler" => match rest {
            [] => Walk::Recycler("recycler".to_string()),
            [expr] => Walk::Recycler(expr.clone()),
            _ => bail!("usage: recycler [EXPR]"),
        },
        "slice-areas" => Walk::SliceAreas(one()?),
        other => bail!("unknown command '{}'\n\n{}", other, USAGE),
    })
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => ConfigLoader::new(path)
            .load()
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ConfigLoader::new("memwalk.toml").load_or_default(),
    };
    validate_config(&config)?;
    Ok(config)
}

fn open_memory(source: &Source) -> Result<Box<dyn MemoryView>> {
    Ok(match source {
        Source::Pid(pid) => Box::new(
            ProcessMemory::open(*pid).with_context(|| format!("opening process {}", pid))?,
        ),
        Source::Snapshot(path) => Box::new(
            SnapshotMemory::load(path)
                .with_context(|| format!("loading snapshot {}", path.display()))?,
        ),
    })
}

/// One element in command output
#[derive(Debug, Serialize)]
struct Element {
    address: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    bucket: Option<u64>,
}

impl Element {
    fn new(value: &TypedValue, bucket: Option<u64>) -> Self {
        Element {
            address: value.address.to_string(),
            type_name: value.type_name().to_string(),
            bucket,
        }
    }
}

#[derive(Debug, Serialize)]
struct PoolLine {
    depth: usize,
    address: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct SliceLine {
    index: u64,
    data: String,
}

#[derive(Debug, Serialize)]
struct AreaOutput {
    #[serde(flatten)]
    report: AreaReport,
    allocated_slices: Vec<SliceLine>,
}

/// Prints `value` as JSON or through `text`
fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

fn print_elements(elements: &Vec<Element>) {
    for e in elements {
        match e.bucket {
            Some(bucket) => println!("[{}] {} {}", bucket, e.address, e.type_name),
            None => println!("{} {}", e.address, e.type_name),
        }
    }
}

fn pool_lines(target: Target<'_>, pools: Vec<(usize, TypedValue)>) -> Result<Vec<PoolLine>> {
    pools
        .into_iter()
        .map(|(depth, pool)| {
            Ok(PoolLine {
                depth,
                address: pool.address.to_string(),
                name: walk::pool_name(&target, &pool)?,
            })
        })
        .collect()
}

fn print_pools(lines: &Vec<PoolLine>) {
    for line in lines {
        println!("{:indent$}{} {}", "", line.address, line.name, indent = line.depth * 2);
    }
}

fn run_walk(target: Target<'_>, config: &Config, json: bool, walk: &Walk) -> Result<()> {
    match walk {
        Walk::List {
            expr,
            reverse,
            hook,
        } => {
            let value = target.resolve(expr)?;
            let list = IntrusiveList::from_value(target, &value, hook.as_deref())?;
            let direction = if *reverse {
                Direction::Reverse
            } else {
                Direction::Forward
            };
            let elements: Vec<Element> = list
                .collect(direction)?
                .iter()
                .map(|v| Element::new(v, None))
                .collect();
            emit(json, &elements, print_elements)
        }
        Walk::Set { expr, hook } => {
            let value = target.resolve(expr)?;
            let set = IntrusiveSet::from_value(target, &value, hook.as_deref())?;
            let elements: Vec<Element> = set
                .collect()?
                .iter()
                .map(|v| Element::new(v, None))
                .collect();
            emit(json, &elements, print_elements)
        }
        Walk::UnorderedSet {
            expr,
            hook,
            buckets,
        } => {
            let value = target.resolve(expr)?;
            let mut set = UnorderedSet::from_value(target, &value, hook.as_deref())?;
            if let Some(count) = buckets {
                set = set.with_bucket_count(*count);
            }
            let mut elements = Vec::new();
            for entry in set.entries() {
                let entry = entry?;
                let owner = TypedValue::new(
                    set.hook().owner_of(entry.node),
                    set.element_type().clone(),
                );
                elements.push(Element::new(&owner, Some(entry.bucket)));
            }
            emit(json, &elements, print_elements)
        }
        Walk::PoolTree(expr) => {
            let pool = target.resolve(expr)?;
            let pools = PoolTreeWalker::new(target, &pool)?
                .map(|entry| entry.map(|e| (e.depth, e.pool)))
                .collect::<Result<Vec<_>, _>>()?;
            emit(json, &pool_lines(target, pools)?, print_pools)
        }
        Walk::PoolChildren(expr) => {
            let pool = target.resolve(expr)?;
            let children = walk::children(target, &pool)?.collect(Direction::Forward)?;
            let pools = children.into_iter().map(|c| (0, c)).collect();
            emit(json, &pool_lines(target, pools)?, print_pools)
        }
        Walk::FindPool { expr, name } => {
            let pool = target.resolve(expr)?;
            let found = walk::find_pools(target, &pool, name)?;
            let pools = found.into_iter().map(|p| (0, p)).collect();
            emit(json, &pool_lines(target, pools)?, print_pools)
        }
        Walk::PoolStats(expr) => {
            let value = target.resolve(expr)?;
            let stats = walk::pool_stats(target, &value, config.walker.page_size)?;
            emit(json, &stats, |stats| match stats {
                walk::PoolStats::Pool(p) => {
                    println!("pool '{}' type={}", p.name, p.kind);
                    println!("size gross={} net={}", p.sizes.gross, p.sizes.net);
                    println!(
                        "recursive_size gross={} net={}",
                        p.recursive_sizes.gross, p.recursive_sizes.net
                    );
                }
                walk::PoolStats::Slice(s) => {
                    println!("slice_pool {}", s.pool);
                    println!("slice_size {}", s.slice_size);
                    println!("area_size {}", s.area_size);
                    println!("slices_per_area {}", s.slices_per_area);
                    for area in &s.areas {
                        println!("area {} allocated={}", area.area, area.allocated_count);
                    }
                    println!("size gross={} net={}", s.sizes.gross, s.sizes.net);
                    println!("n_allocated {}", s.allocated_slices);
                }
            })
        }
        Walk::PoolRefs(expr) => {
            let pool = target.resolve(expr)?;
            let name = walk::pool_name(&target, &pool)?;
            for which in [RefList::Refs, RefList::Unrefs] {
                let refs = walk::pool_refs(target, &pool, which)?;
                emit(json, &refs, |refs| {
                    println!("pool '{}' {}:", name, which.field_name());
                    for r in refs {
                        println!("{:4} {}:{}", r.count, r.file.as_deref().unwrap_or("?"), r.line);
                    }
                })?;
            }
            Ok(())
        }
        Walk::PoolAllocations(expr) => {
            let pool = target.resolve(expr)?;
            let allocations = walk::pool_allocations(target, &pool)?;
            emit(json, &allocations, |allocations| {
                for a in allocations {
                    let mut columns = vec![a.data.to_string(), format!("{:8}", a.size)];
                    columns.extend(a.type_name.clone());
                    columns.extend(a.location.clone());
                    println!("{}", columns.join(" "));
                }
            })
        }
        Walk::Recycler(expr) => {
            let recycler = target.resolve(expr)?;
            let stats = walk::recycler_stats(target, &recycler)?;
            emit(json, &stats, |s| {
                println!("n_pools {}", s.pools);
                println!("n_areas {} {}", s.declared_linear_areas, s.linear_areas);
                println!("area_total_size {}", s.linear_area_total_size);
            })
        }
        Walk::SliceAreas(expr) => {
            let pool = target.resolve(expr)?;
            let inspector = SlicePoolInspector::new(target, &pool, config.walker.page_size)?;
            let mut areas = Vec::new();
            for report in inspector.reports()? {
                let allocated_slices = report
                    .allocated_slices(inspector.geometry())?
                    .into_iter()
                    .map(|(index, data)| SliceLine {
                        index,
                        data: data.to_string(),
                    })
                    .collect();
                areas.push(AreaOutput {
                    report,
                    allocated_slices,
                });
            }
            emit(json, &areas, |areas| {
                for area in areas {
                    let r = &area.report;
                    println!(
                        "{} allocated_count={} free_head={}",
                        r.area, r.allocated_count, r.free_head
                    );
                    if let Some(corruption) = &r.corruption {
                        println!(
                            "  free list corrupted at index {} (previous: {:?}), {} slots unknown",
                            corruption.index,
                            corruption.previous,
                            r.unknown().len()
                        );
                    }
                    for slice in &area.allocated_slices {
                        println!("  slice[{}] data={}", slice.index, slice.data);
                    }
                }
            })
        }
    }
}

fn capture(memory: &dyn MemoryView, output: &PathBuf, ranges: &[(Address, usize)]) -> Result<()> {
    let mut snapshot = SnapshotMemory::new();
    for (base, len) in ranges {
        snapshot
            .capture(memory, *base, *len)
            .with_context(|| format!("capturing {} bytes at {}", len, base))?;
    }
    snapshot.save(output)?;
    info!(
        regions = snapshot.region_count(),
        bytes = snapshot.total_size(),
        "wrote {}",
        output.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    let options = match parse_args(std::env::args().skip(1))? {
        Some(options) => options,
        None => return Ok(()),
    };
    let config = load_config(options.config.as_ref())?;

    // Initialize logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!(?options, "starting memwalk v{}", memwalk::VERSION);
    let memory = open_memory(&options.source)?;

    let walk = match &options.command {
        Command::Capture { output, ranges } => return capture(memory.as_ref(), output, ranges),
        Command::Walk(walk) => walk,
    };

    let layout = options.layout.as_ref().unwrap_or(&config.layout.path);
    let types = TypeRegistry::load(layout)
        .with_context(|| format!("loading layout {}", layout.display()))?;
    let target = Target::new(memory.as_ref(), &types).with_max_string_len(config.walker.max_string_len);

    run_walk(target, &config, options.json, walk)
}
