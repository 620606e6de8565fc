//! Penner CLI - seamless feature-aligned parameterization.
//!
//! Usage: penner [--log-level LEVEL] <COMMAND> [OPTIONS]
//!
//! Run `penner --help` for available commands.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use penner::feature::{generate_refined_feature_mesh, FeatureEdges, FeatureOptions};
use penner::field::FieldOptions;
use penner::io::{self, ObjMesh, OutputFiles};
use penner::layout::analysis::{
    compute_cone_angles, compute_feature_alignment, cone_vertices, count_seams, find_seams, split_components,
};
use penner::metric::MarkedMetricParameters;
use penner::optimize::{IterationMonitor, MarkedMetricOptimizer, MonitorAction, NewtonParameters};
use penner::session::{generate_frame_field, Command, CommandOutcome, Session};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "penner")]
#[command(author, version, about = "Seamless feature-aligned parameterization", long_about = None)]
struct Cli {
    /// Logging verbosity
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect features, refine, and fit a frame field
    GenerateField {
        /// Input mesh file
        #[arg(long)]
        mesh: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "./")]
        output: PathBuf,

        /// Cancel adjacent cone pairs before writing the field
        #[arg(long)]
        collapse_cones: bool,

        /// JSON file with feature and field options
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Optimize a marked metric and write the parameterization
    Parameterize {
        /// Mesh name (without obj suffix, e.g. fandisk)
        #[arg(long)]
        name: String,

        /// Input directory
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "./")]
        output: PathBuf,

        /// Use the features and field saved in the input directory
        #[arg(long)]
        use_existing_field: bool,

        /// Run a full solve before the relaxed one
        #[arg(long)]
        full: bool,

        /// Resume from a checkpoint written by an earlier run
        #[arg(long)]
        resume: Option<PathBuf>,

        /// JSON file with feature, field, metric, and Newton options
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        metric: MetricArgs,

        #[command(flatten)]
        newton: NewtonArgs,
    },

    /// Edit a saved field and optionally re-solve
    ModifyField {
        /// Mesh name (without obj suffix, e.g. fandisk)
        #[arg(long)]
        name: String,

        /// Input directory
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "./")]
        output: PathBuf,

        /// Refit the field from curvature first
        #[arg(long)]
        recompute: bool,

        /// Cancel cone pairs
        #[arg(long)]
        collapse_cones: bool,

        /// Longest path between cancelled cones (default: adjacent only)
        #[arg(long, requires = "collapse_cones")]
        max_distance: Option<f64>,

        /// Parameterize with the edited field and write `<name>_param.obj`
        #[arg(long)]
        parameterize: bool,

        /// JSON file with field, metric, and Newton options
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Report diagnostics of a parameterized mesh
    ViewUv {
        /// Parameterized OBJ with feature `l` records
        #[arg(long)]
        mesh: PathBuf,

        /// List every cone
        #[arg(long)]
        cones: bool,
    },

    /// Split a parameterized mesh into its UV components
    Components {
        /// Parameterized OBJ
        #[arg(long)]
        mesh: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "./")]
        output: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    /// Errors only
    Critical,
    Off,
}

impl LogLevel {
    fn filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Critical => log::LevelFilter::Error,
            LogLevel::Off => log::LevelFilter::Off,
        }
    }
}

#[derive(Args)]
struct MetricArgs {
    /// Use initial zero coordinates
    #[arg(long)]
    use_initial_zero: bool,

    /// Remove homology basis loop holonomy constraints
    #[arg(long)]
    remove_loop_constraints: bool,

    /// Remove symmetry structure from mesh
    #[arg(long)]
    remove_symmetry: bool,
}

#[derive(Args)]
struct NewtonArgs {
    /// Reduce line step size to bounded range for stability
    #[arg(long)]
    do_reduction: bool,

    /// Solver to use for linear systems
    #[arg(long, value_parser = clap::builder::PossibleValuesParser::new(penner::linalg::SOLVER_NAMES))]
    solver: Option<String>,

    /// Start with lambda = lambda0 for each newton iteration
    #[arg(long)]
    reset_lambda: bool,

    /// Initial line step size
    #[arg(long)]
    lambda0: Option<f64>,

    /// Upper bound for newton iterations
    #[arg(long)]
    max_itr: Option<usize>,

    /// Line step threshold to stop bounding the error norm
    #[arg(long)]
    bound_norm_thres: Option<f64>,

    /// Number of iterations to wait between checkpoints (nonpositive for never)
    #[arg(long, allow_negative_numbers = true)]
    checkpoint_frequency: Option<i64>,

    /// Stop once the constraint error is below this value
    #[arg(long)]
    error_eps: Option<f64>,
}

/// Options read from `--config`; command-line flags take precedence.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Config {
    features: FeatureOptions,
    field: FieldOptions,
    metric: MarkedMetricParameters,
    newton: NewtonParameters,
}

impl Config {
    fn load(path: Option<&Path>) -> CliResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e))?;
        log::info!("using configuration {}", path.display());
        Ok(config)
    }
}

impl MetricArgs {
    fn apply(&self, params: &mut MarkedMetricParameters) {
        params.use_initial_zero |= self.use_initial_zero;
        params.remove_loop_constraints |= self.remove_loop_constraints;
        params.remove_symmetry |= self.remove_symmetry;
    }
}

impl NewtonArgs {
    fn apply(&self, params: &mut NewtonParameters) {
        params.do_reduction |= self.do_reduction;
        params.reset_lambda |= self.reset_lambda;
        if let Some(solver) = &self.solver {
            params.solver = solver.clone();
        }
        if let Some(lambda0) = self.lambda0 {
            params.lambda0 = lambda0;
        }
        if let Some(max_itr) = self.max_itr {
            params.max_itr = max_itr;
        }
        if let Some(thres) = self.bound_norm_thres {
            params.bound_norm_thres = thres;
        }
        if let Some(frequency) = self.checkpoint_frequency {
            params.checkpoint_frequency = frequency;
        }
        if let Some(eps) = self.error_eps {
            params.error_eps = eps;
        }
    }
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_level.filter())
        .parse_default_env()
        .init();

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> CliResult<()> {
    match command {
        Commands::GenerateField {
            mesh,
            output,
            collapse_cones,
            config,
        } => cmd_generate_field(&mesh, &output, collapse_cones, &Config::load(config.as_deref())?),

        Commands::Parameterize {
            name,
            input,
            output,
            use_existing_field,
            full,
            resume,
            config,
            metric,
            newton,
        } => {
            let mut config = Config::load(config.as_deref())?;
            metric.apply(&mut config.metric);
            newton.apply(&mut config.newton);
            cmd_parameterize(
                &OutputFiles::new(input, name.as_str()),
                &OutputFiles::new(output, name.as_str()),
                use_existing_field,
                full,
                resume.as_deref(),
                config,
            )
        }

        Commands::ModifyField {
            name,
            input,
            output,
            recompute,
            collapse_cones,
            max_distance,
            parameterize,
            config,
        } => {
            let mut commands = Vec::new();
            let config = Config::load(config.as_deref())?;
            if recompute {
                commands.push(Command::RecomputeField { options: config.field });
            }
            if collapse_cones {
                commands.push(Command::CollapseCones { max_distance });
            }
            if parameterize {
                commands.push(Command::Parameterize {
                    newton: config.newton.clone(),
                    full: true,
                });
            }
            let files_out = OutputFiles::new(output, name.as_str());
            commands.push(Command::WriteField { path: files_out.field() });
            cmd_modify_field(&OutputFiles::new(input, name.as_str()), &files_out, commands, config.metric)
        }

        Commands::ViewUv { mesh, cones } => cmd_view_uv(&mesh, cones),

        Commands::Components { mesh, output } => cmd_components(&mesh, &output),
    }
}

/// A monitor that keeps one status line per Newton solve on the terminal.
fn create_monitor() -> IterationMonitor {
    IterationMonitor::new(|report| {
        eprint!(
            "\r[newton {}] iteration {:4}  error {:.3e}  lambda {:.2e}",
            report.mode, report.iteration, report.error, report.lambda
        );
        let _ = std::io::stderr().flush();
        MonitorAction::Continue
    })
}

fn load_features(files: &OutputFiles) -> CliResult<FeatureEdges> {
    Ok(FeatureEdges {
        features: io::load_feature_edges(files.features())?,
        hard: io::load_feature_edges(files.hard_features())?,
    })
}

fn cmd_generate_field(mesh_path: &Path, output: &Path, collapse_cones: bool, config: &Config) -> CliResult<()> {
    fs::create_dir_all(output)?;
    let files = OutputFiles::for_mesh(output, mesh_path);
    let obj = io::obj::load(mesh_path)?;
    println!("Loaded: {} vertices, {} faces", obj.vertices.len(), obj.faces.len());

    let start = Instant::now();
    let refined = generate_refined_feature_mesh(&obj.vertices, &obj.faces, &config.features)?;
    let features = refined.feature_edges();
    println!(
        "Features: {} edges ({} hard), {} vertices inserted",
        features.features.len(),
        features.hard.len(),
        refined.num_inserted()
    );

    let mut session = Session::new(&refined.vertices, &refined.faces, features.clone(), config.field, config.metric)?;
    println!("Field: {} cones", session.num_cones()?);
    if collapse_cones {
        if let CommandOutcome::ConesCollapsed { pairs, num_cones } =
            session.apply(Command::CollapseCones { max_distance: None })?
        {
            println!("Collapsed {} cone pairs, {} cones left", pairs, num_cones);
        }
    }
    let elapsed = start.elapsed();

    io::obj::save(&ObjMesh::from_triangles(&refined.vertices, &refined.faces), files.mesh())?;
    io::save_feature_edges(files.features(), &features.features)?;
    io::save_feature_edges(files.hard_features(), &features.hard)?;
    session.apply(Command::WriteField { path: files.field() })?;
    println!("Saved: {}.* in {} ({:.2?})", files.name(), output.display(), elapsed);
    Ok(())
}

fn cmd_parameterize(
    files_in: &OutputFiles,
    files_out: &OutputFiles,
    use_existing_field: bool,
    full: bool,
    resume: Option<&Path>,
    mut config: Config,
) -> CliResult<()> {
    fs::create_dir_all(files_out.dir())?;
    let obj = io::obj::load(files_in.mesh())?;
    println!("Loaded: {} vertices, {} faces", obj.vertices.len(), obj.faces.len());

    let (vertices, faces, features, field) = if use_existing_field {
        log::info!("loading features and field from {}", files_in.dir().display());
        let features = load_features(files_in)?;
        let field = io::load_frame_field(files_in.field())?;
        (obj.vertices, obj.faces, features, field)
    } else {
        let refined = generate_refined_feature_mesh(&obj.vertices, &obj.faces, &config.features)?;
        let features = refined.feature_edges();
        let field = generate_frame_field(&refined.vertices, &refined.faces, &features, &config.field)?;
        (refined.vertices, refined.faces, features, field)
    };

    if config.newton.output_dir.is_none() {
        config.newton.output_dir = Some(files_out.dir().to_path_buf());
    }

    let start = Instant::now();
    let mut optimizer = MarkedMetricOptimizer::new(&vertices, &faces, &features, field, config.metric)?;
    optimizer.set_monitor(create_monitor());
    if let Some(checkpoint) = resume {
        optimizer.resume_from_checkpoint(checkpoint)?;
    }
    if full {
        let report = optimizer.optimize_full(&config.newton)?;
        eprintln!();
        println!("Full: {:?} after {} iterations, error {:.3e}", report.status, report.iterations, report.error);
    }
    let report = optimizer.optimize_relaxed(&config.newton)?;
    eprintln!();
    println!("Relaxed: {:?} after {} iterations, error {:.3e}", report.status, report.iterations, report.error);
    if !report.status.is_converged() {
        log::warn!("writing the best iterate of a non-converged solve");
        optimizer.accept_best_effort()?;
    }

    optimizer.parameterize(false)?;
    let param = optimizer.get_parameterization()?;
    let elapsed = start.elapsed();

    let mut out = ObjMesh::from_parameterization(param);
    out.edges = optimizer.refined_mesh().feature_edges.clone();
    io::obj::save(&out, files_out.optimized())?;
    println!("Saved: {} ({:.2?})", files_out.optimized().display(), elapsed);
    Ok(())
}

fn cmd_modify_field(
    files_in: &OutputFiles,
    files_out: &OutputFiles,
    commands: Vec<Command>,
    params: MarkedMetricParameters,
) -> CliResult<()> {
    fs::create_dir_all(files_out.dir())?;
    let obj = io::obj::load(files_in.mesh())?;
    let features = load_features(files_in)?;
    let field = io::load_frame_field(files_in.field())?;
    let mut session = Session::with_field(&obj.vertices, &obj.faces, features, &field, params)?;
    println!("Field: {} cones", session.num_cones()?);

    for command in commands {
        match session.apply(command)? {
            CommandOutcome::FieldRecomputed { num_cones } => println!("Recomputed field: {} cones", num_cones),
            CommandOutcome::ConesCollapsed { pairs, num_cones } => {
                println!("Collapsed {} cone pairs, {} cones left", pairs, num_cones)
            }
            CommandOutcome::Parameterized { report } => {
                println!("Parameterized: {:?} after {} iterations", report.status, report.iterations);
                if let Some(param) = session.parameterization() {
                    io::obj::save(&ObjMesh::from_parameterization(param), files_out.parameterized())?;
                    println!("Saved: {}", files_out.parameterized().display());
                }
            }
            CommandOutcome::FieldWritten { path } => println!("Saved: {}", path.display()),
        }
    }
    Ok(())
}

fn cmd_view_uv(mesh_path: &Path, list_cones: bool) -> CliResult<()> {
    let obj = io::obj::load(mesh_path)?;
    if !obj.has_uv() {
        return Err(format!("{} has no texture coordinates", mesh_path.display()).into());
    }

    println!("File: {}", mesh_path.display());
    println!("Vertices: {}", obj.vertices.len());
    println!("Faces: {}", obj.faces.len());
    println!("UV vertices: {}", obj.uv.len());

    let alignment = compute_feature_alignment(&obj.faces, &obj.uv, &obj.uv_faces, &obj.edges);
    let max_alignment = alignment.iter().copied().filter(|a| !a.is_nan()).fold(0.0, f64::max);
    println!("Feature edges: {}", obj.edges.len());
    println!("Maximum feature alignment: {:.3e}", max_alignment);

    let seams = find_seams(&obj.faces, &obj.uv_faces);
    println!("Seam edges: {}", count_seams(&seams));

    let cones = cone_vertices(&compute_cone_angles(&obj.faces, &obj.uv, &obj.uv_faces));
    println!("Cones: {}", cones.len());
    if list_cones {
        for (v, defect) in cones {
            let p = obj.vertices[v];
            println!(
                "  vertex {:6} ({:.3}, {:.3}, {:.3})  angle defect {:+.4}",
                v, p.x, p.y, p.z, defect
            );
        }
    }
    Ok(())
}

fn cmd_components(mesh_path: &Path, output: &Path) -> CliResult<()> {
    let obj = io::obj::load(mesh_path)?;
    if !obj.has_uv() {
        return Err(format!("{} has no texture coordinates", mesh_path.display()).into());
    }
    fs::create_dir_all(output)?;

    let components = split_components(&obj.vertices, &obj.faces, &obj.uv, &obj.uv_faces);
    println!("Components: {}", components.len());
    for (i, component) in components.iter().enumerate() {
        let mesh = ObjMesh {
            vertices: component.vertices.clone(),
            faces: component.faces.clone(),
            uv: component.uv.clone(),
            uv_faces: component.uv_faces.clone(),
            edges: Vec::new(),
        };
        io::obj::save(&mesh, output.join(format!("component_{}.obj", i)))?;

        let layout = ObjMesh {
            vertices: component.uv.iter().map(|t| nalgebra::Point3::new(t.x, t.y, 0.0)).collect(),
            faces: component.uv_faces.clone(),
            uv: component.uv.clone(),
            uv_faces: component.uv_faces.clone(),
            edges: Vec::new(),
        };
        io::obj::save(&layout, output.join(format!("layout_{}.obj", i)))?;
        println!("  component {}: {} faces", i, component.faces.len());
    }
    Ok(())
}
