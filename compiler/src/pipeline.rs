// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId. Every entity type finishes attribute extraction before
// any entity type is analysed; a failure in one entity type is reported and
// the remaining types still compile.
//
// Preconditions: the state holds a parsed model or programmatic definitions.
// Postconditions: artifacts for the required passes are populated for every
//                 entity type that compiled; `has_error` is set otherwise.
// Failure modes: resolve errors stop the pipeline; per-entity compile errors
//                become diagnostics.
// Side effects: calls on_pass_complete callback after each pass; `tracing`
//               events with per-pass timing.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::ast::ModelFile;
use crate::codegen::{self, CodegenOptions, GeneratedEntity};
use crate::diag::{DiagLevel, Diagnostic};
use crate::entity::{EntityAnalysis, EntityDef, EntityDescriptor, EntityRole};
use crate::error::{CompileError, DefinitionError};
use crate::pass::{descriptor, required_passes, PassId};

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for `--emit build-info`.
///
/// `source_hash`: SHA-256 of the raw `.nml` source text.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub compiler_version: &'static str,
}

#[derive(Serialize)]
struct BuildInfo<'a> {
    source_hash: String,
    compiler_version: &'a str,
    entities: Vec<EntitySummary<'a>>,
}

#[derive(Serialize)]
struct EntitySummary<'a> {
    name: &'a str,
    #[serde(flatten)]
    role: &'a EntityRole,
    has_spike: bool,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Serialize provenance and the entity list as pretty JSON.
    pub fn to_json(&self, descriptors: &[EntityDescriptor]) -> serde_json::Result<String> {
        let info = BuildInfo {
            source_hash: self.source_hash_hex(),
            compiler_version: self.compiler_version,
            entities: descriptors
                .iter()
                .map(|d| EntitySummary {
                    name: &d.name,
                    role: &d.role,
                    has_spike: d.has_spike,
                })
                .collect(),
        };
        serde_json::to_string_pretty(&info)
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Compute provenance from source text.
pub fn compute_provenance(source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let result = hasher.finalize();
    let mut source_hash = [0u8; 32];
    source_hash.copy_from_slice(&result);

    Provenance {
        source_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    /// Parsed model file; `None` when definitions were built in code.
    pub model: Option<ModelFile>,
    pub definitions: Vec<EntityDef>,
    pub descriptors: Vec<EntityDescriptor>,
    pub analyses: Vec<EntityAnalysis>,
    pub generated: Vec<GeneratedEntity>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(model: ModelFile) -> Self {
        let mut state = CompilationState::from_definitions(Vec::new());
        state.model = Some(model);
        state
    }

    /// Start from entity definitions written against the library API.
    pub fn from_definitions(definitions: Vec<EntityDef>) -> Self {
        Self {
            model: None,
            definitions,
            descriptors: Vec::new(),
            analyses: Vec::new(),
            generated: Vec::new(),
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }

    fn descriptor(&self, name: &str) -> Option<&EntityDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution produced error-level diagnostics.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The first pass that produced an error.
    pub failing_pass: PassId,
}

// ── Helper: check diagnostics for errors ───────────────────────────────────

fn has_error_diags(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

/// Per-pass post-processing: callback, accumulate, timing, error check.
/// Returns true if the pass reported errors.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> bool {
    on_pass_complete(pass_id, &diags);
    let is_err = has_error_diags(&diags);
    info!(
        pass = descriptor(pass_id).name,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        diagnostics = diags.len(),
        "pass complete"
    );
    state.diagnostics.extend(diags);
    if is_err {
        state.has_error = true;
    }
    is_err
}

// ── Passes ─────────────────────────────────────────────────────────────────

fn run_resolve(state: &mut CompilationState) -> Vec<Diagnostic> {
    let Some(model) = &state.model else {
        return Vec::new();
    };
    let result = crate::resolve::resolve(model);
    state.definitions = result.entities;
    result.diagnostics
}

fn run_extract(state: &mut CompilationState) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    let mut descriptors = Vec::with_capacity(state.definitions.len());
    for def in &state.definitions {
        if descriptors.iter().any(|d: &EntityDescriptor| d.name == def.name()) {
            let err = CompileError::new(
                def.name(),
                None,
                DefinitionError::DuplicateEntity {
                    name: def.name().to_string(),
                },
            );
            diags.push(Diagnostic::from(&err));
            continue;
        }
        match def.extract() {
            Ok(d) => {
                debug!(
                    entity = %d.name,
                    attributes = d.attributes.len(),
                    has_spike = d.has_spike,
                    "extracted attributes"
                );
                descriptors.push(d);
            }
            Err(e) => diags.push(Diagnostic::from(&e)),
        }
    }
    state.descriptors = descriptors;
    diags
}

fn analyse_one(state: &CompilationState, def: &EntityDef) -> Option<Result<EntityAnalysis, CompileError>> {
    let own = state.descriptor(def.name())?;
    Some(match def {
        EntityDef::Neuron(n) => n.analyse(own),
        EntityDef::Synapse(s) => {
            let neuron = |name: &str| {
                state
                    .descriptor(name)
                    .filter(|d| d.is_neuron())
                    .ok_or_else(|| {
                        CompileError::new(
                            &s.name,
                            None,
                            DefinitionError::UnknownNeuronType {
                                name: name.to_string(),
                            },
                        )
                    })
            };
            neuron(&s.pre).and_then(|pre| {
                let post = neuron(&s.post)?;
                s.analyse(own, pre, post)
            })
        }
    })
}

fn run_analyse(state: &mut CompilationState) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    let mut analyses = Vec::with_capacity(state.descriptors.len());
    for def in &state.definitions {
        match analyse_one(state, def) {
            // Extraction already reported this entity type.
            None => {}
            Some(Ok(a)) => {
                debug!(
                    entity = a.name(),
                    blocks = a.update.len() + a.reset.len(),
                    randoms = a.randoms.len(),
                    "analysed equations"
                );
                analyses.push(a);
            }
            Some(Err(e)) => diags.push(Diagnostic::from(&e)),
        }
    }
    state.analyses = analyses;
    diags
}

fn run_generate(state: &mut CompilationState, options: &CodegenOptions) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    let mut generated = Vec::with_capacity(state.analyses.len());
    for a in &state.analyses {
        match codegen::generate(a, options) {
            Ok(g) => {
                debug!(
                    entity = %g.name,
                    class = %g.class_name,
                    lines = g.source.lines().count(),
                    "generated class"
                );
                generated.push(g);
            }
            Err(e) => diags.push(Diagnostic::from(&e)),
        }
    }
    state.generated = generated;
    diags
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → timing → error check.
///
/// Preconditions: `state.model` or `state.definitions` is set.
/// Postconditions: artifacts for all passes in `required_passes(terminal)` are
///   populated for the entity types that compiled.
/// Failure modes: resolve errors stop before extraction; later errors only
///   remove the failing entity type from downstream artifacts.
/// Side effects: calls `on_pass_complete` after each pass for immediate diagnostic display.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    codegen_options: &CodegenOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let mut first_failure = None;
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let diags = match pass_id {
            PassId::Resolve => run_resolve(state),
            PassId::Extract => run_extract(state),
            PassId::Analyse => run_analyse(state),
            PassId::Generate => run_generate(state, codegen_options),
        };
        let elapsed = t.elapsed();
        if finish_pass(state, pass_id, diags, elapsed, &mut on_pass_complete) {
            first_failure.get_or_insert(pass_id);
            if pass_id == PassId::Resolve {
                break;
            }
        }
    }
    match first_failure {
        Some(failing_pass) => Err(PipelineError { failing_pass }),
        None => Ok(()),
    }
}

/// Parse, resolve and compile a model source up to `terminal`.
pub fn compile_source(
    source: &str,
    terminal: PassId,
    codegen_options: &CodegenOptions,
    on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> (CompilationState, Result<(), PipelineError>) {
    let parsed = crate::parser::parse(source);
    let provenance = compute_provenance(source);
    if !parsed.errors.is_empty() || parsed.model.is_none() {
        let mut state = CompilationState::from_definitions(Vec::new());
        state.diagnostics = parsed.errors.iter().map(Diagnostic::from_parse_error).collect();
        if state.diagnostics.is_empty() {
            state
                .diagnostics
                .push(Diagnostic::from_message("parse failed with no output"));
        }
        state.has_error = true;
        state.provenance = Some(provenance);
        return (
            state,
            Err(PipelineError {
                failing_pass: PassId::Resolve,
            }),
        );
    }
    let mut state = match parsed.model {
        Some(model) => CompilationState::new(model),
        None => CompilationState::from_definitions(Vec::new()),
    };
    state.provenance = Some(provenance);
    let result = run_pipeline(&mut state, terminal, codegen_options, on_pass_complete);
    (state, result)
}

// ── Tests ──────────────────────────────────────────────────────────────────
