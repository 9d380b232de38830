// nmc — Neuron Model Compiler
//
// Library root. Leaf-first: expressions and attributes, the capture context,
// block segmentation and numerical lowering, symbol correspondence and code
// generation, then the textual front-end and the pass pipeline.

pub mod ast;
pub mod attribute;
pub mod block;
pub mod capture;
pub mod codegen;
pub mod correspond;
pub mod diag;
pub mod entity;
pub mod error;
pub mod expr;
pub mod lexer;
pub mod method;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod render;
pub mod resolve;
