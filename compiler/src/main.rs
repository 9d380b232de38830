use clap::Parser;
use std::path::PathBuf;

use nmc::codegen::CodegenOptions;
use nmc::diag::Diagnostic;
use nmc::pass::PassId;
use nmc::pipeline::{compile_source, CompilationState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Generated C++ classes
    Cpp,
    /// Lowered statement blocks (JSON)
    Blocks,
    /// Export bindings per entity type (JSON)
    Exports,
    /// Extracted attribute lists (JSON)
    Attributes,
    /// Source hash, compiler version and entity list (JSON)
    BuildInfo,
    /// Human-readable analysis report
    Report,
}

impl EmitStage {
    fn terminal(self) -> PassId {
        match self {
            EmitStage::Cpp | EmitStage::Exports => PassId::Generate,
            EmitStage::Blocks | EmitStage::Report => PassId::Analyse,
            EmitStage::Attributes | EmitStage::BuildInfo => PassId::Extract,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum RealType {
    Double,
    Float,
}

#[derive(Parser, Debug)]
#[command(
    name = "nmc",
    version,
    about = "Neuron Model Compiler — compiles .nml neuron/synapse models to C++ classes"
)]
struct Cli {
    /// Input .nml model file
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Cpp)]
    emit: EmitStage,

    /// C++ type of double-precision attributes
    #[arg(long, value_enum, default_value_t = RealType::Double)]
    real_type: RealType,

    /// Omit the human-readable equation comments
    #[arg(long)]
    no_comments: bool,

    /// Header included by every generated class
    #[arg(long, default_value = "network.hpp")]
    runtime_header: String,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "nmc=debug" } else { "nmc=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_diagnostic(source: &str, path: &std::path::Path, diag: &Diagnostic) {
    match diag.line_col(source) {
        Some((line, col)) => eprintln!("{}:{}:{}: {}", path.display(), line, col, diag),
        None => eprintln!("{}: {}", path.display(), diag),
    }
}

fn render(state: &CompilationState, emit: EmitStage) -> Result<String, serde_json::Error> {
    Ok(match emit {
        EmitStage::Cpp => state
            .generated
            .iter()
            .map(|g| g.source.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        EmitStage::Blocks => serde_json::to_string_pretty(&state.analyses)? + "\n",
        EmitStage::Exports => {
            let exports: std::collections::BTreeMap<&str, _> = state
                .generated
                .iter()
                .map(|g| (g.class_name.as_str(), &g.exports))
                .collect();
            serde_json::to_string_pretty(&exports)? + "\n"
        }
        EmitStage::Attributes => serde_json::to_string_pretty(&state.descriptors)? + "\n",
        EmitStage::BuildInfo => match &state.provenance {
            Some(p) => p.to_json(&state.descriptors)? + "\n",
            None => String::new(),
        },
        EmitStage::Report => state
            .analyses
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join("\n"),
    })
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    tracing::debug!(
        source = %cli.source.display(),
        emit = ?cli.emit,
        "starting"
    );

    // ── Read source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("nmc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let options = CodegenOptions {
        real_type: match cli.real_type {
            RealType::Double => "double".to_string(),
            RealType::Float => "float".to_string(),
        },
        emit_comments: !cli.no_comments,
        runtime_header: cli.runtime_header.clone(),
        ..CodegenOptions::default()
    };

    // ── Compile ──
    let (state, result) = compile_source(&source, cli.emit.terminal(), &options, |_, diags| {
        for d in diags {
            print_diagnostic(&source, &cli.source, d);
        }
    });
    if result.is_err() {
        let errors = state
            .diagnostics
            .iter()
            .filter(|d| d.level == nmc::diag::DiagLevel::Error)
            .count();
        // Parse failures never reach the pass callback.
        if state.model.is_none() && state.definitions.is_empty() {
            for d in &state.diagnostics {
                print_diagnostic(&source, &cli.source, d);
            }
        }
        eprintln!("nmc: {} error(s)", errors.max(1));
        std::process::exit(1);
    }

    // ── Emit ──
    let text = match render(&state, cli.emit) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("nmc: error: {}", e);
            std::process::exit(1);
        }
    };
    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("nmc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{}", text),
    }
}
