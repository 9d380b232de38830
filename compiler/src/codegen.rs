// codegen.rs — C++ code generation for neuron and synapse types
//
// Transforms one analysed entity type into a self-contained C++ class:
// attribute fields, a constructor sizing per-element storage, `rng()`, and
// the update/spike/reset (neurons) or collect_inputs/update (synapses)
// methods. Every symbol goes through the class's correspondence table.
//
// Preconditions: the entity type was analysed without errors.
// Postconditions: one field per attribute, scalar for shared attributes and
//                 a (nested) vector for per-element ones; no partial class is
//                 returned on failure.
// Failure modes: unresolvable symbols or a missing pre/post type produce
//                `CompileError` naming the method being generated.
// Side effects: none.

use std::fmt::Write as _;

use serde::Serialize;

use crate::attribute::{Attribute, Locality, NumericType};
use crate::capture::{Distribution, RandomVariableSpec};
use crate::correspond::Correspondence;
use crate::entity::{EntityAnalysis, EntityDescriptor, EntityRole, LoweredBlock};
use crate::error::{CompileError, EntityMethod, GenerationError};
use crate::expr::Expr;
use crate::method::Step;
use crate::render;

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodegenOptions {
    /// C++ type used for `double` attributes and temporaries.
    pub real_type: String,
    /// Emit the human-readable form of each statement above it.
    pub emit_comments: bool,
    /// Class names are `<prefix>Neuron_<Name>` / `<prefix>Synapse_<Name>`.
    pub class_prefix: String,
    /// Header declaring `Network` (`t`, `dt`, `rng`).
    pub runtime_header: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            real_type: "double".to_string(),
            emit_comments: true,
            class_prefix: "cpp".to_string(),
            runtime_header: "network.hpp".to_string(),
        }
    }
}

/// Attribute a host wrapper must expose.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportBinding {
    pub attribute: String,
    pub locality: Locality,
    pub numeric_type: NumericType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedEntity {
    pub name: String,
    pub class_name: String,
    pub source: String,
    pub exports: Vec<ExportBinding>,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Generate the C++ class of one analysed entity type.
pub fn generate(
    analysis: &EntityAnalysis,
    options: &CodegenOptions,
) -> Result<GeneratedEntity, CompileError> {
    let mut ctx = CodegenCtx::new(analysis, options)?;
    ctx.emit_all()
        .map_err(|(method, e)| CompileError::new(analysis.name(), method, e))?;
    Ok(ctx.build_result())
}

pub fn exports(descriptor: &EntityDescriptor) -> Vec<ExportBinding> {
    descriptor
        .attributes
        .iter()
        .map(|a| ExportBinding {
            attribute: a.name.clone(),
            locality: a.locality,
            numeric_type: a.numeric_type,
        })
        .collect()
}

// ── Internal context ────────────────────────────────────────────────────────

type EmitResult = Result<(), (Option<EntityMethod>, GenerationError)>;

/// Loop nest over the elements of the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// `for i in 0..size`
    Population,
    /// `for i in 0..pre->size, j in 0..post->size`
    Projection,
}

struct CodegenCtx<'a> {
    analysis: &'a EntityAnalysis,
    options: &'a CodegenOptions,
    shape: Shape,
    class_name: String,
    table: Correspondence,
    /// Presynaptic type spikes (synapses only).
    pre_spiking: bool,
    out: String,
}

impl<'a> CodegenCtx<'a> {
    fn new(analysis: &'a EntityAnalysis, options: &'a CodegenOptions) -> Result<Self, CompileError> {
        let d = &analysis.descriptor;
        let (shape, class_name, mut table, pre_spiking) = match &d.role {
            EntityRole::Neuron => (
                Shape::Population,
                format!("{}Neuron_{}", options.class_prefix, d.name),
                Correspondence::neuron(&d.attributes, &analysis.randoms),
                false,
            ),
            EntityRole::Synapse { pre, post } => {
                let missing = |name: &str| {
                    CompileError::new(
                        &d.name,
                        None,
                        GenerationError::MissingNeuron {
                            name: name.to_string(),
                        },
                    )
                };
                let pre_d = analysis.pre.as_ref().ok_or_else(|| missing(pre))?;
                let post_d = analysis.post.as_ref().ok_or_else(|| missing(post))?;
                (
                    Shape::Projection,
                    format!("{}Synapse_{}", options.class_prefix, d.name),
                    Correspondence::synapse(
                        &d.attributes,
                        &analysis.randoms,
                        &pre_d.attributes,
                        &post_d.attributes,
                    ),
                    pre_d.has_spike,
                )
            }
        };
        for block in analysis.update.iter().chain(&analysis.reset) {
            for step in block.steps.iter().filter(|s| s.temporary) {
                table.add_local(&step.target);
            }
        }
        Ok(CodegenCtx {
            analysis,
            options,
            shape,
            class_name,
            table,
            pre_spiking,
            out: String::with_capacity(4096),
        })
    }

    fn build_result(self) -> GeneratedEntity {
        GeneratedEntity {
            name: self.analysis.name().to_string(),
            class_name: self.class_name,
            source: self.out,
            exports: exports(&self.analysis.descriptor),
        }
    }

    fn real(&self) -> &str {
        &self.options.real_type
    }

    fn cpp_type(&self, attr: &Attribute) -> String {
        attr.numeric_type.cpp(self.real())
    }

    fn render(&self, e: &Expr) -> Result<String, GenerationError> {
        render::to_c(e, &self.table)
    }

    // ── Top-level emit ──────────────────────────────────────────────────

    fn emit_all(&mut self) -> EmitResult {
        self.emit_preamble();
        match self.shape {
            Shape::Population => {
                let _ = writeln!(self.out, "class {} {{", self.class_name);
                self.out.push_str("    public:\n\n");
                self.emit_constructor().map_err(|e| (None, e))?;
                self.emit_fields();
                self.emit_rng().map_err(|e| (None, e))?;
                self.emit_reset_inputs();
                self.emit_update()
                    .map_err(|e| (Some(EntityMethod::Update), e))?;
                self.emit_spike().map_err(|e| (Some(EntityMethod::Spike), e))?;
                self.emit_reset().map_err(|e| (Some(EntityMethod::Reset), e))?;
            }
            Shape::Projection => {
                self.out
                    .push_str("template<typename PrePopulation, typename PostPopulation>\n");
                let _ = writeln!(self.out, "class {} {{", self.class_name);
                self.out.push_str("    public:\n\n");
                self.emit_constructor().map_err(|e| (None, e))?;
                self.emit_fields();
                self.emit_rng().map_err(|e| (None, e))?;
                self.emit_collect_inputs()
                    .map_err(|e| (Some(EntityMethod::Transmit), e))?;
                self.emit_update()
                    .map_err(|e| (Some(EntityMethod::Update), e))?;
            }
        }
        self.out.push_str("};\n");
        Ok(())
    }

    // ── Phase 1: Preamble ───────────────────────────────────────────────

    fn emit_preamble(&mut self) {
        let kind = match self.shape {
            Shape::Population => "neuron",
            Shape::Projection => "synapse",
        };
        let _ = writeln!(
            self.out,
            "// Generated by nmc from {kind} type `{}`",
            self.analysis.name()
        );
        self.out.push_str("#pragma once\n\n");
        self.out.push_str("#include <cmath>\n");
        self.out.push_str("#include <random>\n");
        self.out.push_str("#include <vector>\n");
        let _ = writeln!(self.out, "#include \"{}\"", self.options.runtime_header);
        self.out.push_str("\nclass Network;\n\n");
    }

    // ── Phase 2: Constructor and fields ─────────────────────────────────

    fn emit_constructor(&mut self) -> Result<(), GenerationError> {
        match self.shape {
            Shape::Population => {
                let _ = writeln!(self.out, "    {}(Network* net, int size) {{", self.class_name);
                self.out.push_str("        this->net = net;\n");
                self.out.push_str("        this->size = size;\n");
            }
            Shape::Projection => {
                let _ = writeln!(
                    self.out,
                    "    {}(Network* net, PrePopulation* pre, PostPopulation* post, std::vector<{}>* target) {{",
                    self.class_name, self.options.real_type
                );
                self.out.push_str("        this->net = net;\n");
                self.out.push_str("        this->pre = pre;\n");
                self.out.push_str("        this->post = post;\n");
                self.out.push_str("        this->target = target;\n");
            }
        }

        let mut init = String::new();
        for attr in &self.analysis.descriptor.attributes {
            let value = init_literal(attr);
            let _ = if attr.is_shared() {
                writeln!(init, "        this->{} = {value};", attr.name)
            } else {
                let ty = self.cpp_type(attr);
                writeln!(init, "        this->{} = {};", attr.name, self.sized(&ty, &value))
            };
        }
        for r in &self.analysis.randoms {
            let zero = self.sized(self.real(), "0.0");
            let _ = writeln!(init, "        this->{} = {zero};", r.name);
            if r.is_constant() {
                let dist = self.distribution(&r.distribution)?;
                let _ = writeln!(init, "        this->{} = {dist};", dist_field(r));
            }
        }
        if self.analysis.descriptor.has_spike {
            init.push_str("        this->spiked = std::vector<int>();\n");
        }
        self.out.push_str(&init);
        self.out.push_str("    };\n\n");
        Ok(())
    }

    /// Storage expression for a per-element attribute of type `ty`.
    fn sized(&self, ty: &str, value: &str) -> String {
        match self.shape {
            Shape::Population => format!("std::vector<{ty}>(size, {value})"),
            Shape::Projection => format!(
                "std::vector<std::vector<{ty}>>(pre->size, std::vector<{ty}>(post->size, {value}))"
            ),
        }
    }

    fn vector_type(&self, ty: &str) -> String {
        match self.shape {
            Shape::Population => format!("std::vector<{ty}>"),
            Shape::Projection => format!("std::vector<std::vector<{ty}>>"),
        }
    }

    fn emit_fields(&mut self) {
        self.out.push_str("    // Network\n");
        self.out.push_str("    Network* net;\n\n");
        match self.shape {
            Shape::Population => {
                self.out.push_str("    // Size of the population\n");
                self.out.push_str("    int size;\n\n");
            }
            Shape::Projection => {
                self.out.push_str("    // Populations\n");
                self.out.push_str("    PrePopulation* pre;\n");
                self.out.push_str("    PostPopulation* post;\n");
                let _ = writeln!(
                    self.out,
                    "    std::vector<{}>* target;\n",
                    self.options.real_type
                );
            }
        }

        let mut fields = String::from("    // Attributes\n");
        for attr in &self.analysis.descriptor.attributes {
            let ty = self.cpp_type(attr);
            let decl = if attr.is_shared() {
                ty
            } else {
                self.vector_type(&ty)
            };
            let _ = writeln!(fields, "    {decl} {};", attr.name);
        }
        if !self.analysis.randoms.is_empty() {
            fields.push_str("\n    // Random variables\n");
        }
        for r in &self.analysis.randoms {
            let _ = writeln!(fields, "    {} {};", self.vector_type(self.real()), r.name);
            if r.is_constant() {
                let _ = writeln!(
                    fields,
                    "    {} {};",
                    distribution_type(&r.distribution, self.real()),
                    dist_field(r)
                );
            }
        }
        if self.analysis.descriptor.has_spike {
            fields.push_str("\n    // Indices of the neurons that spiked this step\n");
            fields.push_str("    std::vector<int> spiked;\n");
        }
        fields.push('\n');
        self.out.push_str(&fields);
    }

    fn distribution(&self, dist: &Distribution) -> Result<String, GenerationError> {
        let [a, b] = dist.params();
        Ok(format!(
            "{}({}, {})",
            distribution_type(dist, self.real()),
            self.render(a)?,
            self.render(b)?
        ))
    }

    // ── Phase 3: Methods ────────────────────────────────────────────────

    /// Open the element loop nest; returns the body indentation.
    fn open_loop(&mut self) -> &'static str {
        match self.shape {
            Shape::Population => {
                self.out
                    .push_str("        for(unsigned int i = 0; i < this->size; i++) {\n");
                "            "
            }
            Shape::Projection => {
                self.out
                    .push_str("        for(int i = 0; i < this->pre->size; i++) {\n");
                self.out
                    .push_str("            for(int j = 0; j < this->post->size; j++) {\n");
                "                "
            }
        }
    }

    fn close_loop(&mut self) {
        if self.shape == Shape::Projection {
            self.out.push_str("            }\n");
        }
        self.out.push_str("        }\n");
    }

    fn emit_rng(&mut self) -> Result<(), GenerationError> {
        self.out.push_str("    // Update RNG method\n");
        self.out.push_str("    void rng() {\n");
        if !self.analysis.randoms.is_empty() {
            let analysis = self.analysis;
            let indent = self.open_loop();
            for r in &analysis.randoms {
                let access = self.table.resolve(&r.name).ok_or_else(|| {
                    GenerationError::UnresolvedSymbol {
                        symbol: r.name.clone(),
                    }
                })?;
                let draw = if r.is_constant() {
                    format!("this->{}(this->net->rng)", dist_field(r))
                } else {
                    format!("{}(this->net->rng)", self.distribution(&r.distribution)?)
                };
                let _ = writeln!(self.out, "{indent}{access} = {draw};");
            }
            self.close_loop();
        }
        self.out.push_str("    };\n\n");
        Ok(())
    }

    fn emit_reset_inputs(&mut self) {
        self.out.push_str("    // Reset inputs method\n");
        self.out.push_str("    void reset_inputs() {\n");
        let inputs: Vec<&Attribute> = self
            .analysis
            .descriptor
            .attributes
            .iter()
            .filter(|a| a.is_input)
            .collect();
        for attr in inputs.iter().filter(|a| a.is_shared()) {
            let _ = writeln!(self.out, "        this->{} = 0.0;", attr.name);
        }
        if inputs.iter().any(|a| !a.is_shared()) {
            self.out
                .push_str("        for(unsigned int i = 0; i < this->size; i++) {\n");
            for attr in inputs.iter().filter(|a| !a.is_shared()) {
                let _ = writeln!(self.out, "            this->{}[i] = 0.0;", attr.name);
            }
            self.out.push_str("        }\n");
        }
        self.out.push_str("    };\n\n");
    }

    fn emit_update(&mut self) -> Result<(), GenerationError> {
        self.out.push_str("    // Update method\n");
        self.out.push_str("    void update() {\n");
        if self.analysis.update.iter().any(|b| !b.steps.is_empty()) {
            let analysis = self.analysis;
            let indent = self.open_loop();
            self.emit_blocks(&analysis.update, indent)?;
            self.close_loop();
        }
        self.out.push_str("    };\n\n");
        Ok(())
    }

    fn emit_spike(&mut self) -> Result<(), GenerationError> {
        self.out.push_str("    // Spike emission\n");
        self.out.push_str("    void spike() {\n");
        if let Some(condition) = &self.analysis.condition {
            let cond = self.render(condition)?;
            self.out.push_str("        this->spiked.clear();\n");
            let indent = self.open_loop();
            let _ = writeln!(self.out, "{indent}if({cond}) {{");
            let _ = writeln!(self.out, "{indent}    this->spiked.push_back(i);");
            let _ = writeln!(self.out, "{indent}}}");
            self.close_loop();
        }
        self.out.push_str("    };\n\n");
        Ok(())
    }

    fn emit_reset(&mut self) -> Result<(), GenerationError> {
        self.out.push_str("    // Reset after spike\n");
        self.out.push_str("    void reset() {\n");
        if self.analysis.reset.iter().any(|b| !b.steps.is_empty()) {
            self.out.push_str(
                "        for(unsigned int idx = 0; idx < this->spiked.size(); idx++) {\n",
            );
            self.out.push_str("            int i = this->spiked[idx];\n");
            let analysis = self.analysis;
            self.emit_blocks(&analysis.reset, "            ")?;
            self.out.push_str("        }\n");
        }
        self.out.push_str("    };\n\n");
        Ok(())
    }

    fn emit_collect_inputs(&mut self) -> Result<(), GenerationError> {
        self.out
            .push_str("    // Collect inputs (weighted sum or spike transmission)\n");
        self.out.push_str("    void collect_inputs() {\n");
        if let Some(transmit) = &self.analysis.transmit {
            let value = self.render(transmit)?;
            if self.pre_spiking {
                self.out.push_str(
                    "        for(unsigned int idx = 0; idx < this->pre->spiked.size(); idx++) {\n",
                );
                self.out.push_str("            int i = this->pre->spiked[idx];\n");
            } else {
                self.out
                    .push_str("        for(int i = 0; i < this->pre->size; i++) {\n");
            }
            self.out
                .push_str("            for(int j = 0; j < this->post->size; j++) {\n");
            if self.options.emit_comments {
                let _ = writeln!(
                    self.out,
                    "                // target += {}",
                    render::human_readable(transmit)
                );
            }
            let _ = writeln!(self.out, "                (*this->target)[j] += {value};");
            self.out.push_str("            }\n");
            self.out.push_str("        }\n");
        }
        self.out.push_str("    };\n\n");
        Ok(())
    }

    /// Blocks declaring temporaries get their own scope, so a variable
    /// integrated by two blocks of one method reuses `_k_<var>` safely.
    fn emit_blocks(&mut self, blocks: &[LoweredBlock], indent: &str) -> Result<(), GenerationError> {
        let inner = format!("{indent}    ");
        for block in blocks {
            if block.steps.iter().any(|s| s.temporary) {
                let _ = writeln!(self.out, "{indent}{{");
                for step in &block.steps {
                    self.emit_step(step, &inner)?;
                }
                let _ = writeln!(self.out, "{indent}}}");
            } else {
                for step in &block.steps {
                    self.emit_step(step, indent)?;
                }
            }
        }
        Ok(())
    }

    fn emit_step(&mut self, step: &Step, indent: &str) -> Result<(), GenerationError> {
        if self.options.emit_comments {
            let _ = writeln!(self.out, "{indent}// {}", step.human_readable());
        }
        let rhs = self.render(&step.rhs)?;
        if step.temporary {
            let _ = writeln!(
                self.out,
                "{indent}{} {} = {rhs};",
                self.options.real_type, step.target
            );
        } else {
            let lhs = self.table.resolve(&step.target).ok_or_else(|| {
                GenerationError::UnresolvedSymbol {
                    symbol: step.target.clone(),
                }
            })?;
            let _ = writeln!(self.out, "{indent}{lhs} {} {rhs};", step.op.symbol());
        }
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn dist_field(r: &RandomVariableSpec) -> String {
    format!("_dist{}", r.name.trim_start_matches("_rand"))
}

fn distribution_type(dist: &Distribution, real: &str) -> String {
    match dist {
        Distribution::Uniform { .. } => format!("std::uniform_real_distribution<{real}>"),
        Distribution::Normal { .. } => format!("std::normal_distribution<{real}>"),
    }
}

/// C++ literal of an attribute's initial value.
fn init_literal(attr: &Attribute) -> String {
    match attr.numeric_type {
        NumericType::Int => format!("{}", attr.init.trunc() as i64),
        NumericType::Bool => (attr.init != 0.0).to_string(),
        NumericType::Double | NumericType::Float => format!("{:?}", attr.init),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
