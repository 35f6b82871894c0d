//! SSA optimization pipeline.
//!
//! Each pass is a self-contained sub-module with the signature
//! `St -> Result<St>`; the state carries the function's CFG (in one of its
//! two shapes), the argument vector, and the monotonic counter for fresh
//! labels and variables. [`optimize_module`] maps every function of a module
//! through the pipeline; functions are independent and processed in
//! parallel.
//!
//! Pass order matters: later passes rely on shapes produced by earlier ones
//! (e.g. `record` expects the blocks `split_blocks` creates, `sink` runs on
//! the map representation restored by `blockify`).

use crate::cfg;
use crate::ir::{Block, BlockMap, Function, Label, Module, Op, Var};
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::BTreeMap;

mod bsm;
mod cse;
mod element;
mod float;
mod live;
mod merge_blocks;
mod misc;
mod record;
mod sink;
mod type_opt;

pub use type_opt::{NoTypeOpt, TypeOptimizer};

// ── CFG representation ───────────────────────────────────────────────────────

/// The two shapes a CFG takes while moving through the pipeline. The
/// `linearize` and `blockify` passes perform the scheduled conversions; the
/// accessors below coerce on demand so that disabling either conversion pass
/// still leaves every other pass runnable.
#[derive(Clone, Debug)]
pub enum Cfg {
    Map(BlockMap),
    Linear(Vec<(Label, Block)>),
}

impl Cfg {
    fn into_map(self) -> BlockMap {
        match self {
            Cfg::Map(blocks) => blocks,
            Cfg::Linear(linear) => linear.into_iter().collect(),
        }
    }

    fn into_linear(self) -> Vec<(Label, Block)> {
        match self {
            Cfg::Linear(linear) => linear,
            Cfg::Map(blocks) => cfg::linearize(&blocks),
        }
    }
}

// ── Pass state ───────────────────────────────────────────────────────────────

/// Per-function pass state.
pub(crate) struct St {
    pub cfg: Cfg,
    pub args: Vec<Var>,
    pub count: u32,
}

impl St {
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.count);
        self.count += 1;
        label
    }

    pub fn new_var(&mut self, base: &str) -> Var {
        let var = Var::gen(base, self.count);
        self.count += 1;
        var
    }
}

// ── Options ──────────────────────────────────────────────────────────────────

/// Optimizer options: a flat map of flags.
///
/// For a pass named `P`, the keys `P` and `no_P` are recognized: a present
/// `no_P` disables the pass; otherwise the pass runs unless `P` is `false`.
/// Every pass defaults to on. Unknown keys are kept but have no effect here.
#[derive(Clone, Debug, Default)]
pub struct Options {
    flags: BTreeMap<String, bool>,
}

impl Options {
    pub fn new() -> Self {
        Options::default()
    }

    pub fn set(&mut self, key: &str, value: bool) -> &mut Self {
        self.flags.insert(key.to_string(), value);
        self
    }

    /// Convenience for the `no_P` form.
    pub fn disable(&mut self, pass: &str) -> &mut Self {
        self.set(&format!("no_{pass}"), true)
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.flags.get(key).copied()
    }

    pub fn pass_enabled(&self, pass: &str) -> bool {
        if self.flags.contains_key(&format!("no_{pass}")) {
            return false;
        }
        self.flags.get(pass).copied().unwrap_or(true)
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

enum PassKind {
    Fixed(fn(St) -> Result<St>),
    /// The external type-based optimization; invoked through the
    /// [`TypeOptimizer`] the driver was given.
    TypeOpt,
}

/// All passes in execution order. Disabled passes are replaced by the
/// identity when the pipeline is assembled.
const PIPELINE: &[(&str, PassKind)] = &[
    ("split_blocks", PassKind::Fixed(split_blocks)),
    ("element", PassKind::Fixed(element::run)),
    ("linearize", PassKind::Fixed(linearize)),
    ("record", PassKind::Fixed(record::run)),
    ("cse", PassKind::Fixed(cse::run)),
    ("type", PassKind::TypeOpt),
    ("float", PassKind::Fixed(float::run)),
    ("live", PassKind::Fixed(live::run)),
    ("bsm", PassKind::Fixed(bsm::run)),
    ("bsm_shortcut", PassKind::Fixed(bsm::run_shortcut)),
    ("misc", PassKind::Fixed(misc::run)),
    ("blockify", PassKind::Fixed(blockify)),
    ("sink", PassKind::Fixed(sink::run)),
    ("merge_blocks", PassKind::Fixed(merge_blocks::run)),
];

/// Optimize every function of a module with the default (no-op) type pass.
pub fn optimize_module(module: Module, options: &Options) -> Result<Module> {
    optimize_module_with(module, options, &NoTypeOpt)
}

/// Optimize every function of a module, delegating the `type` pass to the
/// given optimizer. Functions are processed in parallel; any failure is
/// reported with the offending function's name and arity.
pub fn optimize_module_with(
    module: Module,
    options: &Options,
    ty: &dyn TypeOptimizer,
) -> Result<Module> {
    let enabled: Vec<&(&str, PassKind)> = PIPELINE
        .iter()
        .filter(|(name, _)| options.pass_enabled(name))
        .collect();
    let functions = module
        .functions
        .into_par_iter()
        .map(|func| {
            let id = format!("{}/{}", func.name.as_str(), func.arity);
            optimize_function(func, &enabled, ty)
                .with_context(|| format!("internal failure optimizing {id}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Module {
        name: module.name,
        functions,
    })
}

fn optimize_function(
    func: Function,
    passes: &[&(&str, PassKind)],
    ty: &dyn TypeOptimizer,
) -> Result<Function> {
    let Function {
        name,
        arity,
        args,
        blocks,
        count,
    } = func;
    let mut st = St {
        cfg: Cfg::Map(blocks),
        args,
        count,
    };
    for (pass_name, kind) in passes {
        st = match kind {
            PassKind::Fixed(run) => {
                run(st).with_context(|| format!("in pass {pass_name}"))?
            }
            PassKind::TypeOpt => {
                let cfg = std::mem::replace(&mut st.cfg, Cfg::Map(BlockMap::new()));
                let linear = ty
                    .optimize(cfg.into_linear(), &st.args)
                    .context("in pass type")?;
                st.cfg = Cfg::Linear(linear);
                st
            }
        };
    }
    Ok(Function {
        name,
        arity,
        args: st.args,
        blocks: st.cfg.into_map(),
        count: st.count,
    })
}

// ── Representation and splitting passes ──────────────────────────────────────

/// Split blocks at `element`, `call` and `make_fun` so that later passes can
/// reorder the element chains and sink values into the shorter blocks.
fn split_blocks(mut st: St) -> Result<St> {
    let blocks = st.cfg.into_map();
    let (blocks, count) = cfg::split_blocks(
        |i| match &i.op {
            Op::Bif(name) => name == "element",
            Op::Call | Op::MakeFun => true,
            _ => false,
        },
        blocks,
        st.count,
    );
    st.count = count;
    st.cfg = Cfg::Map(blocks);
    Ok(st)
}

/// Switch to the ordered-list representation.
fn linearize(mut st: St) -> Result<St> {
    let blocks = st.cfg.into_map();
    st.cfg = Cfg::Linear(cfg::linearize(&blocks));
    Ok(st)
}

/// Switch back to the label-keyed map representation.
fn blockify(mut st: St) -> Result<St> {
    let linear = st.cfg.into_linear();
    st.cfg = Cfg::Map(linear.into_iter().collect());
    Ok(st)
}

/// Pass names usable with `Options::disable`; the CLI mirrors this list.
pub const PASS_NAMES: &[&str] = &[
    "split_blocks",
    "element",
    "linearize",
    "record",
    "cse",
    "type",
    "float",
    "live",
    "bsm",
    "bsm_shortcut",
    "misc",
    "blockify",
    "sink",
    "merge_blocks",
];
