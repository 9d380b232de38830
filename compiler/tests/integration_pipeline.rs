// End-to-end pipeline tests: compile the demo models through every pass
// and check the structure of the generated classes.
//
// Uses the library API (parse → resolve → extract → analyse → generate)
// directly. Demo models live under `demos/` at the project root.

use std::path::{Path, PathBuf};

use nmc::codegen::{CodegenOptions, GeneratedEntity};
use nmc::diag::{codes, DiagLevel};
use nmc::entity::EntityRole;
use nmc::pass::PassId;
use nmc::pipeline::{compile_source, CompilationState};

// ── Test helpers ────────────────────────────────────────────────────────────

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn demo(name: &str) -> String {
    let path = project_root().join("demos").join(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e))
}

fn compile(source: &str) -> CompilationState {
    let (state, result) = compile_source(source, PassId::Generate, &CodegenOptions::default(), |_, _| {});
    assert!(result.is_ok(), "diagnostics: {:#?}", state.diagnostics);
    state
}

fn class<'a>(state: &'a CompilationState, name: &str) -> &'a GeneratedEntity {
    state
        .generated
        .iter()
        .find(|g| g.name == name)
        .unwrap_or_else(|| panic!("no generated class for {name}"))
}

fn error_codes(state: &CompilationState) -> Vec<&'static str> {
    state
        .diagnostics
        .iter()
        .filter(|d| d.level == DiagLevel::Error)
        .filter_map(|d| d.code.map(|c| c.0))
        .collect()
}

// ── Demo models ─────────────────────────────────────────────────────────────

#[test]
fn all_demos_compile() {
    for name in ["lif.nml", "izhikevich.nml", "rate.nml"] {
        let state = compile(&demo(name));
        assert!(!state.generated.is_empty(), "{name} generated nothing");
        assert!(!state.has_error, "{name}");
    }
}

#[test]
fn lif_neuron_class() {
    let state = compile(&demo("lif.nml"));
    let lif = class(&state, "LIF");
    assert_eq!(lif.class_name, "cppNeuron_LIF");
    let src = &lif.source;

    assert!(src.contains("class cppNeuron_LIF {"));
    assert!(src.contains("    cppNeuron_LIF(Network* net, int size) {"));
    assert!(src.contains("        this->v = std::vector<double>(size, -65.0);"));
    assert!(src.contains("        this->tau = 20.0;"));

    // Exponential step goes through a temporary with expm1.
    assert!(src.contains("double _k_v = "));
    assert!(src.contains("expm1("));
    assert!(src.contains("this->v[i] = _k_v;"));

    assert!(src.contains("if(this->v[i] >= this->V_th) {"));
    assert!(src.contains("this->spiked.push_back(i);"));
    assert!(src.contains("this->v[i] = this->V_reset;"));

    // Only the declared input is cleared.
    assert!(src.contains("            this->ge[i] = 0.0;"));
    assert!(!src.contains("this->g[i] = 0.0;"));
}

#[test]
fn synapse_from_spiking_population_iterates_spikes() {
    let state = compile(&demo("lif.nml"));
    let exc = class(&state, "Exc");
    assert_eq!(exc.class_name, "cppSynapse_Exc");
    let src = &exc.source;
    assert!(src.contains("template<typename PrePopulation, typename PostPopulation>"));
    assert!(src.contains(
        "cppSynapse_Exc(Network* net, PrePopulation* pre, PostPopulation* post, std::vector<double>* target) {"
    ));
    assert!(src.contains("int i = this->pre->spiked[idx];"));
    assert!(src.contains("(*this->target)[j] += fmin(fmax(this->w[i][j], 0.0), this->w_max);"));
    assert!(!src.contains("void spike()"));
}

#[test]
fn synapse_from_rate_population_iterates_all() {
    let state = compile(&demo("rate.nml"));
    let src = &class(&state, "Oja").source;
    assert!(src.contains("for(int i = 0; i < this->pre->size; i++) {"));
    assert!(!src.contains("this->pre->spiked"));
    assert!(src.contains("this->pre->r[i]"));
    assert!(src.contains("this->post->r[j]"));
    assert!(src.contains("std::vector<std::vector<float>> trace;"));
}

#[test]
fn izhikevich_midpoint_with_noise() {
    let state = compile(&demo("izhikevich.nml"));
    let analysis = &state.analyses[0];
    assert_eq!(analysis.randoms.len(), 1);
    assert!(analysis.randoms[0].is_constant());

    let src = &class(&state, "Izhikevich").source;
    assert!(src.contains("std::normal_distribution<double> _dist_0;"));
    assert!(src.contains("this->_rand_0[i] = this->_dist_0(this->net->rng);"));
    assert!(src.contains("double _k1_v = "));
    assert!(src.contains("double _k1_u = "));
    // Reset uses the increment form of `u += d`.
    assert!(src.contains("this->u[i] = this->u[i] + this->d;"));
    // v**2 never reaches pow().
    assert!(!src.contains("pow("));
}

#[test]
fn rate_rk4_stages() {
    let state = compile(&demo("rate.nml"));
    let src = &class(&state, "Rate").source;
    for temp in ["_k1_mp", "_p2_mp", "_k2_mp", "_p3_mp", "_k3_mp", "_p4_mp", "_k4_mp"] {
        assert!(src.contains(&format!("double {temp} = ")), "missing {temp}");
    }
    assert!(src.contains("std::uniform_real_distribution<double> _dist_0;"));
    assert!(src.contains("this->baseline = std::vector<double>(size, 0.0);"));
}

// ── Generated field set ─────────────────────────────────────────────────────

/// Every attribute has exactly one field, scalar when shared.
#[test]
fn every_attribute_has_one_field() {
    for name in ["lif.nml", "izhikevich.nml", "rate.nml"] {
        let state = compile(&demo(name));
        for (descriptor, generated) in state.descriptors.iter().zip(&state.generated) {
            assert_eq!(descriptor.name, generated.name);
            let real = "double";
            for attr in &descriptor.attributes {
                let ty = attr.numeric_type.cpp(real);
                let decl = match (&descriptor.role, attr.is_shared()) {
                    (_, true) => ty,
                    (EntityRole::Neuron, false) => format!("std::vector<{ty}>"),
                    (EntityRole::Synapse { .. }, false) => {
                        format!("std::vector<std::vector<{ty}>>")
                    }
                };
                let line = format!("    {decl} {};\n", attr.name);
                assert_eq!(
                    generated.source.matches(&line).count(),
                    1,
                    "{}: field `{}` in\n{}",
                    descriptor.name,
                    attr.name,
                    generated.source
                );
            }
        }
    }
}

#[test]
fn exports_follow_declaration_order() {
    let state = compile(&demo("lif.nml"));
    let lif = class(&state, "LIF");
    let names: Vec<&str> = lif.exports.iter().map(|e| e.attribute.as_str()).collect();
    assert_eq!(
        names,
        vec!["tau", "E_L", "V_th", "V_reset", "tau_e", "ge", "g", "v", "r"]
    );
}

#[test]
fn real_type_option_applies_to_storage_and_temporaries() {
    let options = CodegenOptions {
        real_type: "float".to_string(),
        ..CodegenOptions::default()
    };
    let (state, result) = compile_source(&demo("lif.nml"), PassId::Generate, &options, |_, _| {});
    assert!(result.is_ok());
    let src = &class(&state, "LIF").source;
    assert!(src.contains("std::vector<float> v;"));
    assert!(src.contains("float _k_v = "));
    assert!(!src.contains("double"));
}

// ── Error policy ────────────────────────────────────────────────────────────

#[test]
fn lowering_failure_keeps_other_entities() {
    let src = "\
neuron Good {
    variable v = 0.0
    update { dv/dt = -v }
}
neuron Bad {
    variable v = 0.0
    update exponential { dv/dt = v**2 }
}
";
    let (state, result) = compile_source(src, PassId::Generate, &CodegenOptions::default(), |_, _| {});
    let err = result.unwrap_err();
    assert_eq!(err.failing_pass, PassId::Analyse);
    assert_eq!(error_codes(&state), vec![codes::E0201.0]);
    let names: Vec<&str> = state.generated.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["Good"]);
}

#[test]
fn resolve_errors_stop_the_pipeline() {
    let src = "\
neuron N {
    variable v = 0.0
    update { dw/dt = -v }
}
";
    let (state, result) = compile_source(src, PassId::Generate, &CodegenOptions::default(), |_, _| {});
    assert_eq!(result.unwrap_err().failing_pass, PassId::Resolve);
    assert!(state.descriptors.is_empty());
    assert!(state.generated.is_empty());
    assert!(state.diagnostics.iter().all(|d| d.span.is_some()));
}

#[test]
fn variable_integrated_twice_in_one_block_is_rejected() {
    let src = "\
neuron Twice {
    variable v = 0.0
    variable u = 0.0
    update {
        dv/dt = -v
        du/dt = -u
        dv/dt = 1.0
    }
}
";
    let (state, result) = compile_source(src, PassId::Generate, &CodegenOptions::default(), |_, _| {});
    assert_eq!(result.unwrap_err().failing_pass, PassId::Analyse);
    assert_eq!(error_codes(&state), vec![codes::E0120.0]);
    assert!(state.generated.is_empty());
}

#[test]
fn variable_integrated_by_two_blocks_compiles() {
    let src = "\
neuron Twice {
    variable v = 0.0
    variable r = 0.0
    update exponential {
        dv/dt = -v
        r = v
        dv/dt = 1.0 - v
    }
}
";
    let state = compile(src);
    let src = &class(&state, "Twice").source;
    let update = &src[src.find("    void update() {").unwrap()..];
    let update = &update[..update.find("    };").unwrap()];
    // Each block declares `_k_v` in its own scope.
    assert_eq!(update.matches("double _k_v = ").count(), 2);
    assert_eq!(update.matches("            {\n").count(), 2);
    assert_eq!(update.matches("this->v[i] = _k_v;").count(), 2);
}

#[test]
fn unknown_presynaptic_type_is_reported() {
    let src = "\
neuron N {
    variable v = 0.0
}
synapse S : Missing -> N {
    variable w = 1.0
    transmit { w }
}
";
    let (state, result) = compile_source(src, PassId::Generate, &CodegenOptions::default(), |_, _| {});
    assert!(result.is_err());
    assert!(error_codes(&state).contains(&codes::E0114.0));
}

#[test]
fn report_lists_methods() {
    let (state, result) = compile_source(&demo("izhikevich.nml"), PassId::Analyse, &CodegenOptions::default(), |_, _| {});
    assert!(result.is_ok());
    let report = state.analyses[0].to_string();
    assert!(report.starts_with("Neuron Izhikevich\n"));
    assert!(report.contains("random: _rand_0 ~ Normal(0.0, 1.0)"));
    assert!(report.contains("[ode, midpoint]"));
    assert!(report.contains("  spike:\n      v >= v_thresh\n"));
}
