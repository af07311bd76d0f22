use clap::{Args, Parser, Subcommand, ValueEnum};
use csv::ReaderBuilder;
use prettytable::{Table, row};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mktab::{
    DistanceFunction, EuclideanDistance, ManhattanDistance, MemoryRelation, MkTabConfig,
    MkTabError, MkTabResult, MkTabTree, ObjectId, PagedNodeStorage, QueryResult, RknnPruning,
};

#[derive(Debug, Parser)]
#[command(name = "mktab", version, about = "Metric index with reverse k-NN queries")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build an index file over the vectors of a CSV file
    Build(CommonArgs),
    /// Query an index built earlier from the same CSV file
    Query {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(value_enum)]
        kind: QueryKind,
        /// Row number (0-based) of the query vector in the CSV file
        #[arg(long)]
        object: u32,
        #[arg(short, long, default_value_t = 1)]
        k: usize,
        /// Radius of a range query
        #[arg(long, default_value_t = 0.0)]
        radius: f64,
        /// Prune reverse k-NN subtrees with each child's own bound
        #[arg(long)]
        entry_bound: bool,
    },
    /// Print the shape of an index
    Stats {
        #[command(flatten)]
        common: CommonArgs,
        /// Also verify the tree structure and every stored k-NN distance
        #[arg(long)]
        verify: bool,
    },
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// CSV file with one numeric vector per row and no header
    #[arg(long)]
    input: PathBuf,
    /// Index file
    #[arg(long)]
    index: PathBuf,
    /// JSON configuration file; the flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    page_size: Option<usize>,
    #[arg(long)]
    k_max: Option<usize>,
    #[arg(long)]
    cache_pages: Option<usize>,
    #[arg(long, value_enum, default_value_t = DistanceArg::Euclidean)]
    distance: DistanceArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DistanceArg {
    Euclidean,
    Manhattan,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum QueryKind {
    Knn,
    Range,
    Rknn,
}

impl CommonArgs {
    fn config(&self) -> MkTabResult<MkTabConfig> {
        let mut config = match &self.config {
            Some(path) => MkTabConfig::from_json_file(path)?,
            None => MkTabConfig::default(),
        };
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        if let Some(k_max) = self.k_max {
            config.k_max = k_max;
        }
        if let Some(cache_pages) = self.cache_pages {
            config.cache_pages = cache_pages;
        }
        Ok(config)
    }

    fn metric(&self) -> Arc<dyn DistanceFunction<Vec<f64>>> {
        match self.distance {
            DistanceArg::Euclidean => Arc::new(EuclideanDistance),
            DistanceArg::Manhattan => Arc::new(ManhattanDistance),
        }
    }

    fn open_tree(&self) -> MkTabResult<MkTabTree<Vec<f64>>> {
        let config = self.config()?;
        let relation = Arc::new(read_vectors(&self.input)?);
        let storage = PagedNodeStorage::open(&self.index, &config)?;
        MkTabTree::open(config, Box::new(storage), self.metric(), relation)
    }
}

fn read_vectors(path: &Path) -> MkTabResult<MemoryRelation<Vec<f64>>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    let mut vectors = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| std::io::Error::other(e.to_string()))?;
        let vector = record
            .iter()
            .map(|field| field.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| MkTabError::InvalidArgument(format!("row {row}: {e}")))?;
        vectors.push(vector);
    }

    log::info!("read {} vectors from {}", vectors.len(), path.display());
    MemoryRelation::from_objects(vectors)
}

fn build(common: &CommonArgs) -> MkTabResult<()> {
    let config = common.config()?;
    let relation = Arc::new(read_vectors(&common.input)?);
    let storage = PagedNodeStorage::create(&common.index, &config)?;

    let tree = MkTabTree::build(config, common.metric(), relation, Box::new(storage))?;
    let counts = tree.node_counts()?;
    println!(
        "Indexed {} objects into {} ({} directory and {} leaf nodes, height {})",
        tree.len(),
        common.index.display(),
        counts.directory,
        counts.leaf,
        tree.height()?
    );
    Ok(())
}

fn print_results(results: &[QueryResult]) {
    let mut table = Table::new();
    table.add_row(row!["rank", "object", "distance"]);
    for (rank, result) in results.iter().enumerate() {
        table.add_row(row![rank + 1, result.id.as_u32(), format!("{:.6}", result.distance)]);
    }
    table.printstd();
    println!("{} result(s)", results.len());
}

fn stats(common: &CommonArgs, verify: bool) -> MkTabResult<()> {
    let tree = common.open_tree()?;
    let capacity = tree.capacity();
    let counts = tree.node_counts()?;
    let root_bound = tree
        .root_bound()
        .iter()
        .map(|b| format!("{b:.4}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut table = Table::new();
    table.add_row(row!["objects", tree.len()]);
    table.add_row(row!["distance", tree.distance_name()]);
    table.add_row(row!["k_max", tree.k_max()]);
    table.add_row(row!["page size", tree.config().page_size]);
    table.add_row(row!["leaf capacity", capacity.leaf]);
    table.add_row(row!["directory capacity", capacity.directory]);
    table.add_row(row!["height", tree.height()?]);
    table.add_row(row!["directory nodes", counts.directory]);
    table.add_row(row!["leaf nodes", counts.leaf]);
    table.add_row(row!["root k-NN bound", root_bound]);
    table.printstd();

    if verify {
        tree.check_integrity()?;
        tree.check_knn_bounds()?;
        println!("Index verified");
    }
    Ok(())
}

fn run(cli: Cli) -> MkTabResult<()> {
    match cli.command {
        Command::Build(common) => build(&common),
        Command::Query {
            common,
            kind,
            object,
            k,
            radius,
            entry_bound,
        } => {
            let mut tree = common.open_tree()?;
            if entry_bound {
                tree.set_rknn_pruning(RknnPruning::EntryBound);
            }
            let metric = common.metric();
            let query = ObjectId(object);

            let results = match kind {
                QueryKind::Knn => tree.knn_query(metric.as_ref(), query, k)?,
                QueryKind::Range => tree.range_query(metric.as_ref(), query, radius)?,
                QueryKind::Rknn => tree.reverse_knn_query(metric.as_ref(), query, k)?,
            };
            match results {
                Some(results) => print_results(&results),
                None => println!("Index does not support this distance"),
            }
            Ok(())
        }
        Command::Stats { common, verify } => stats(&common, verify),
    }
}

fn main() {
    env_logger::init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
