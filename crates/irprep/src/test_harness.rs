//! Test harness for irprep unit and integration tests
//!
//! This module provides a reference evaluator for integer, pointer and vector
//! IR, instruction counters, guard checks and constructors for the sample
//! modules the tests share. It is available in tests and with the
//! `test-harness` feature (on by default).
//!
//! # Example
//!
//! ```rust
//! use irprep::ir::BinOp;
//! use irprep::test_harness::*;
//! use irprep::{PipelineConfig, prepare};
//!
//! let module = binary_module("f", BinOp::SDiv);
//! let prepared = prepare(&PipelineConfig::default(), module).expect("pipeline");
//!
//! let mut eval = Evaluator::new(&prepared);
//! let out = eval.run("f", vec![Value::int(32, 7), Value::int(32, 0)]).expect("evaluates");
//! assert!(out.is_aborted());
//! ```

#![allow(
    clippy::match_same_arms,
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
    clippy::too_many_lines
)]

use std::collections::HashMap;

use crate::config::RUNTIME_HOOK_PREFIX;
use crate::ir::{
    BinOp, Block, BlockId, Callee, CastOp, Constant, Dominators, Function, FunctionBuilder,
    InstKind, Instruction, IntPredicate, Module, Operand, RmwOp, Terminator, Type, ValueId, eval,
    sign_extend, truncate_to,
};
use crate::passes::{GuardKind, is_guarded_op};
use crate::{Error, Result};

// =============================================================================
// Reference evaluator
// =============================================================================

/// Runtime value of the reference evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int { bits: u32, value: u64 },
    Ptr(u64),
    Vector(Vec<Value>),
}

impl Value {
    pub fn int(bits: u32, value: u64) -> Self {
        Value::Int {
            bits,
            value: truncate_to(value, bits),
        }
    }

    /// Integer value or address; `None` for vectors.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int { value, .. } => Some(*value),
            Value::Ptr(addr) => Some(*addr),
            Value::Vector(_) => None,
        }
    }

    fn scalar(&self) -> Result<(u32, u64)> {
        match self {
            Value::Int { bits, value } => Ok((*bits, *value)),
            Value::Ptr(addr) => Ok((64, *addr)),
            Value::Vector(_) => Err(unsupported("vector used where a scalar is expected")),
        }
    }

    fn lanes(&self) -> Result<&[Value]> {
        match self {
            Value::Vector(lanes) => Ok(lanes),
            _ => Err(unsupported("scalar used where a vector is expected")),
        }
    }
}

/// How a call finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Returned(Option<Value>),
    /// A report hook or `abort` was called; carries the callee name.
    Aborted(String),
}

impl Outcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Outcome::Aborted(_))
    }

    pub fn returned_u64(&self) -> Option<u64> {
        match self {
            Outcome::Returned(Some(value)) => value.as_u64(),
            _ => None,
        }
    }
}

fn unsupported(what: impl Into<String>) -> Error {
    Error::Unsupported(what.into())
}

const STEP_LIMIT: u64 = 1_000_000;
const BASE_ADDRESS: u64 = 0x1000;

/// Executes functions of one module over a private byte-addressed memory.
///
/// Every function and global variable gets an address; globals are
/// initialized from their initializers. Reading memory never written yields
/// zero bytes. Undefined behavior (division by zero, oversized shifts,
/// reaching `unreachable`) is reported as an error rather than evaluated.
pub struct Evaluator<'m> {
    module: &'m Module,
    memory: HashMap<u64, u8>,
    symbols: HashMap<String, u64>,
    functions: HashMap<u64, String>,
    next_address: u64,
    steps: u64,
}

type Frame = HashMap<ValueId, Value>;

impl<'m> Evaluator<'m> {
    pub fn new(module: &'m Module) -> Self {
        let mut evaluator = Self {
            module,
            memory: HashMap::new(),
            symbols: HashMap::new(),
            functions: HashMap::new(),
            next_address: BASE_ADDRESS,
            steps: 0,
        };
        for func in &module.functions {
            let addr = evaluator.allocate(8);
            evaluator.symbols.insert(func.name.clone(), addr);
            evaluator.functions.insert(addr, func.name.clone());
        }
        let mut layout = Vec::new();
        for global in &module.globals {
            let size = global.init.iter().map(|c| c.ty().store_size()).sum();
            let addr = evaluator.allocate(size);
            evaluator.symbols.insert(global.name.clone(), addr);
            layout.push((addr, &global.init));
        }
        for (mut addr, init) in layout {
            for field in init {
                if let Ok(value) = evaluator.constant(field) {
                    evaluator.store(addr, &value);
                }
                addr += field.ty().store_size();
            }
        }
        evaluator
    }

    /// Call `name` with `args`.
    pub fn run(&mut self, name: &str, args: Vec<Value>) -> Result<Outcome> {
        self.call(name, args)
    }

    /// Address assigned to a function, global variable or alias.
    pub fn symbol_address(&self, name: &str) -> Result<u64> {
        let mut current = name;
        for _ in 0..=self.module.aliases.len() {
            if let Some(addr) = self.symbols.get(current) {
                return Ok(*addr);
            }
            match self.module.alias(current) {
                Some(alias) => current = &alias.target,
                None => break,
            }
        }
        Err(Error::UnknownSymbol(name.to_string()))
    }

    /// Reserve `size` bytes (8-aligned, with a gap after).
    pub fn allocate(&mut self, size: u64) -> u64 {
        let addr = self.next_address;
        self.next_address += size.max(1).next_multiple_of(8) + 8;
        addr
    }

    pub fn read_bytes(&self, addr: u64, len: u64) -> u64 {
        (0..len.min(8)).fold(0, |raw, i| {
            let byte = self.memory.get(&addr.wrapping_add(i)).copied().unwrap_or(0);
            raw | (u64::from(byte) << (8 * i))
        })
    }

    pub fn write_bytes(&mut self, addr: u64, len: u64, raw: u64) {
        for i in 0..len.min(8) {
            self.memory
                .insert(addr.wrapping_add(i), (raw >> (8 * i)) as u8);
        }
    }

    pub fn load(&self, ty: &Type, addr: u64) -> Result<Value> {
        match ty {
            Type::Int(bits) => Ok(Value::int(*bits, self.read_bytes(addr, ty.store_size()))),
            Type::Ptr => Ok(Value::Ptr(self.read_bytes(addr, 8))),
            Type::Vector { elem, lanes } if ty.is_packed_vector() => {
                let width = elem.int_width().unwrap_or(1) * lanes;
                reshape(&Value::int(width, self.read_bytes(addr, ty.store_size())), ty)
            }
            Type::Vector { elem, lanes } => (0..u64::from(*lanes))
                .map(|i| self.load(elem, addr + i * elem.store_size()))
                .collect::<Result<Vec<_>>>()
                .map(Value::Vector),
            _ => Err(unsupported(format!("load of {ty}"))),
        }
    }

    pub fn store(&mut self, addr: u64, value: &Value) {
        match value {
            Value::Int { bits, value } => {
                self.write_bytes(addr, u64::from(bits.div_ceil(8)), *value);
            }
            Value::Ptr(target) => self.write_bytes(addr, 8, *target),
            Value::Vector(lanes) if packed_width(lanes).is_some() => {
                let width = packed_width(lanes).unwrap_or(0);
                if let Ok(Value::Int { value: raw, .. }) = reshape(value, &Type::Int(width)) {
                    self.write_bytes(addr, u64::from(width.div_ceil(8)), raw);
                }
            }
            Value::Vector(lanes) => {
                let mut at = addr;
                for lane in lanes {
                    self.store(at, lane);
                    at += value_size(lane);
                }
            }
        }
    }

    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > STEP_LIMIT {
            return Err(Error::Internal("evaluation step limit exceeded".into()));
        }
        Ok(())
    }

    fn constant(&self, constant: &Constant) -> Result<Value> {
        match constant {
            Constant::Int { bits, value } => Ok(Value::int(*bits, *value)),
            Constant::Null => Ok(Value::Ptr(0)),
            Constant::Undef(ty) => zero(ty),
            Constant::Vector(lanes) => lanes
                .iter()
                .map(|lane| self.constant(lane))
                .collect::<Result<Vec<_>>>()
                .map(Value::Vector),
            Constant::Symbol(name) => self.symbol_address(name).map(Value::Ptr),
            Constant::F32(_) | Constant::F64(_) => Err(unsupported("floating-point constant")),
        }
    }

    fn operand(&self, frame: &Frame, operand: &Operand) -> Result<Value> {
        match operand {
            Operand::Value(id) => frame
                .get(id)
                .cloned()
                .ok_or_else(|| Error::Internal(format!("{id} read before definition"))),
            Operand::Const(constant) => self.constant(constant),
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Outcome> {
        if name.starts_with(&format!("{RUNTIME_HOOK_PREFIX}report_"))
            || name == "abort"
            || name == "llvm.trap"
        {
            return Ok(Outcome::Aborted(name.to_string()));
        }
        if name.starts_with("llvm.") {
            return self.intrinsic(name, &args).map(Outcome::Returned);
        }
        let module = self.module;
        let func = module
            .resolve_function(name)
            .ok_or_else(|| Error::UnknownSymbol(name.to_string()))?;
        if func.is_declaration() {
            return Err(unsupported(format!("call to external function @{name}")));
        }
        self.execute(func, args)
    }

    fn execute(&mut self, func: &'m Function, args: Vec<Value>) -> Result<Outcome> {
        let mut frame: Frame = func.params.iter().copied().zip(args).collect();
        let mut block: &'m Block = func
            .entry()
            .ok_or_else(|| unsupported(format!("@{} has no body", func.name)))?;
        let mut prev: Option<BlockId> = None;
        loop {
            // PHIs read their inputs before any of them is written.
            let phis = block.first_non_phi();
            let mut entering = Vec::with_capacity(phis);
            for inst in &block.insts[..phis] {
                let InstKind::Phi { incoming } = &inst.kind else {
                    continue;
                };
                let from = prev.ok_or_else(|| Error::Internal("PHI in entry block".into()))?;
                let (value, _) = incoming
                    .iter()
                    .find(|(_, pred)| *pred == from)
                    .ok_or_else(|| {
                        Error::Internal(format!("PHI in {} has no entry for {from}", block.id))
                    })?;
                entering.push((inst.result, self.operand(&frame, value)?));
            }
            for (result, value) in entering {
                if let Some(result) = result {
                    frame.insert(result, value);
                }
            }

            for inst in &block.insts[phis..] {
                self.tick()?;
                if let Some(hook) = self.step(&mut frame, inst)? {
                    return Ok(Outcome::Aborted(hook));
                }
            }

            self.tick()?;
            let next = match &block.term {
                Terminator::Br(dest) => *dest,
                Terminator::CondBr {
                    cond,
                    then_dest,
                    else_dest,
                } => {
                    if self.operand(&frame, cond)?.scalar()?.1 != 0 {
                        *then_dest
                    } else {
                        *else_dest
                    }
                }
                Terminator::Switch {
                    value,
                    default,
                    cases,
                } => {
                    let (bits, value) = self.operand(&frame, value)?.scalar()?;
                    cases
                        .iter()
                        .find(|(case, _)| truncate_to(*case, bits) == value)
                        .map_or(*default, |(_, dest)| *dest)
                }
                Terminator::Ret(value) => {
                    let value = value
                        .as_ref()
                        .map(|op| self.operand(&frame, op))
                        .transpose()?;
                    return Ok(Outcome::Returned(value));
                }
                Terminator::Unreachable => {
                    return Err(unsupported(format!(
                        "reached unreachable in @{} {}",
                        func.name, block.id
                    )));
                }
            };
            prev = Some(block.id);
            block = func
                .block(next)
                .ok_or_else(|| Error::Internal(format!("branch to missing block {next}")))?;
        }
    }

    /// Execute one non-PHI instruction. Returns the hook name if it aborted.
    fn step(&mut self, frame: &mut Frame, inst: &Instruction) -> Result<Option<String>> {
        let undefined = || unsupported(format!("undefined result of `{inst}`"));
        let value = match &inst.kind {
            InstKind::Binary { op, lhs, rhs } => {
                let (lhs, rhs) = (self.operand(frame, lhs)?, self.operand(frame, rhs)?);
                Some(lanewise(&lhs, &rhs, |a, b| {
                    let ((bits, a), (_, b)) = (a.scalar()?, b.scalar()?);
                    eval::binary(*op, bits, a, b)
                        .map(|v| Value::int(bits, v))
                        .ok_or_else(undefined)
                })?)
            }
            InstKind::ICmp { pred, lhs, rhs } => {
                let (lhs, rhs) = (self.operand(frame, lhs)?, self.operand(frame, rhs)?);
                Some(lanewise(&lhs, &rhs, |a, b| {
                    let ((bits, a), (_, b)) = (a.scalar()?, b.scalar()?);
                    Ok(Value::int(1, u64::from(eval::icmp(*pred, bits, a, b))))
                })?)
            }
            InstKind::Cast { op, value } => {
                let value = self.operand(frame, value)?;
                let target = inst.ty.element();
                let value_lanes = match &value {
                    Value::Vector(lanes) => Some(lanes.len()),
                    _ => None,
                };
                Some(match &value {
                    _ if value_lanes != inst.ty.lanes().map(|n| n as usize) => {
                        reshape(&value, &inst.ty)?
                    }
                    Value::Vector(lanes) => Value::Vector(
                        lanes
                            .iter()
                            .map(|lane| cast(*op, lane, target))
                            .collect::<Result<_>>()?,
                    ),
                    scalar => cast(*op, scalar, target)?,
                })
            }
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => {
                let cond = self.operand(frame, cond)?;
                let then_value = self.operand(frame, then_value)?;
                let else_value = self.operand(frame, else_value)?;
                Some(match &cond {
                    Value::Vector(mask) => {
                        let (a, b) = (then_value.lanes()?, else_value.lanes()?);
                        let mut out = Vec::with_capacity(mask.len());
                        for (i, lane) in mask.iter().enumerate() {
                            let pick = if lane.scalar()?.1 != 0 { &a[i] } else { &b[i] };
                            out.push(pick.clone());
                        }
                        Value::Vector(out)
                    }
                    scalar if scalar.scalar()?.1 != 0 => then_value,
                    _ => else_value,
                })
            }
            InstKind::Load { ptr, .. } => {
                let addr = self.operand(frame, ptr)?.scalar()?.1;
                Some(self.load(&inst.ty, addr)?)
            }
            InstKind::Store { value, ptr, .. } => {
                let value = self.operand(frame, value)?;
                let addr = self.operand(frame, ptr)?.scalar()?.1;
                self.store(addr, &value);
                None
            }
            InstKind::Alloca { allocated } => Some(Value::Ptr(self.allocate(allocated.store_size()))),
            InstKind::PtrAdd { base, offset } => {
                let base = self.operand(frame, base)?.scalar()?.1;
                let (bits, offset) = self.operand(frame, offset)?.scalar()?;
                Some(Value::Ptr(base.wrapping_add(sign_extend(offset, bits) as u64)))
            }
            InstKind::Call { callee, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.operand(frame, arg))
                    .collect::<Result<Vec<_>>>()?;
                let name = match callee {
                    Callee::Direct(name) => name.clone(),
                    Callee::Indirect(target) => {
                        let addr = self.operand(frame, target)?.scalar()?.1;
                        self.functions
                            .get(&addr)
                            .cloned()
                            .ok_or_else(|| unsupported(format!("indirect call to {addr:#x}")))?
                    }
                    Callee::InlineAsm { asm, .. } if asm.trim().is_empty() => {
                        return Ok(None);
                    }
                    Callee::InlineAsm { asm, .. } => {
                        return Err(unsupported(format!("inline asm \"{asm}\"")));
                    }
                };
                match self.call(&name, args)? {
                    Outcome::Returned(value) => value,
                    Outcome::Aborted(hook) => return Ok(Some(hook)),
                }
            }
            InstKind::Phi { .. } => {
                return Err(Error::Internal(format!("PHI after non-PHI: `{inst}`")));
            }
            InstKind::ExtractElement { vector, index } => {
                let vector = self.operand(frame, vector)?;
                let index = self.operand(frame, index)?.scalar()?.1;
                Some(
                    usize::try_from(index)
                        .ok()
                        .and_then(|i| vector.lanes().ok()?.get(i).cloned())
                        .ok_or_else(undefined)?,
                )
            }
            InstKind::InsertElement {
                vector,
                value,
                index,
            } => {
                let mut lanes = self.operand(frame, vector)?.lanes()?.to_vec();
                let value = self.operand(frame, value)?;
                let index = self.operand(frame, index)?.scalar()?.1;
                let slot = usize::try_from(index)
                    .ok()
                    .and_then(|i| lanes.get_mut(i))
                    .ok_or_else(undefined)?;
                *slot = value;
                Some(Value::Vector(lanes))
            }
            InstKind::ShuffleVector { lhs, rhs, mask } => {
                let mut lanes = self.operand(frame, lhs)?.lanes()?.to_vec();
                lanes.extend_from_slice(self.operand(frame, rhs)?.lanes()?);
                let mut out = Vec::with_capacity(mask.len());
                for lane in mask {
                    out.push(match lane {
                        Some(i) => lanes.get(*i as usize).cloned().ok_or_else(undefined)?,
                        None => zero(inst.ty.element())?,
                    });
                }
                Some(Value::Vector(out))
            }
            InstKind::AtomicRmw { op, ptr, value } => {
                let addr = self.operand(frame, ptr)?.scalar()?.1;
                let operand = self.operand(frame, value)?;
                let old = self.load(&inst.ty, addr)?;
                let new = rmw(*op, &old, &operand)?;
                self.store(addr, &new);
                Some(old)
            }
            InstKind::CmpXchg {
                ptr,
                expected,
                replacement,
            } => {
                let addr = self.operand(frame, ptr)?.scalar()?.1;
                let expected = self.operand(frame, expected)?;
                let replacement = self.operand(frame, replacement)?;
                let old = self.load(&inst.ty, addr)?;
                if old == expected {
                    self.store(addr, &replacement);
                }
                Some(old)
            }
            InstKind::Fence => None,
        };
        if let (Some(result), Some(value)) = (inst.result, value) {
            frame.insert(result, value);
        }
        Ok(None)
    }

    fn intrinsic(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>> {
        let base = name.trim_start_matches("llvm.");
        let arg = |i: usize| {
            args.get(i)
                .ok_or_else(|| unsupported(format!("@{name}: missing argument {i}")))
        };
        let family = |prefix: &str| base == prefix || base.starts_with(&format!("{prefix}."));
        if family("memcpy") || family("memmove") {
            let (dst, src) = (arg(0)?.scalar()?.1, arg(1)?.scalar()?.1);
            let len = arg(2)?.scalar()?.1;
            let bytes: Vec<u64> = (0..len).map(|i| self.read_bytes(src + i, 1)).collect();
            for (i, byte) in (0..).zip(bytes) {
                self.write_bytes(dst + i, 1, byte);
            }
            return Ok(None);
        }
        if family("memset") {
            let (dst, byte) = (arg(0)?.scalar()?.1, arg(1)?.scalar()?.1);
            for i in 0..arg(2)?.scalar()?.1 {
                self.write_bytes(dst + i, 1, byte);
            }
            return Ok(None);
        }
        if family("expect") {
            return Ok(Some(arg(0)?.clone()));
        }
        if ["dbg", "lifetime", "invariant", "assume", "sideeffect", "donothing", "prefetch"]
            .iter()
            .any(|&f| family(f))
            || base.starts_with("var.annotation")
        {
            return Ok(None);
        }
        if let Some(rest) = base.strip_prefix("vector.reduce.") {
            let op = match rest.split('.').next() {
                Some("add") => BinOp::Add,
                Some("mul") => BinOp::Mul,
                Some("and") => BinOp::And,
                Some("or") => BinOp::Or,
                Some("xor") => BinOp::Xor,
                _ => return Err(unsupported(format!("@{name}"))),
            };
            let lanes = arg(0)?.lanes()?;
            let mut acc = lanes
                .first()
                .cloned()
                .ok_or_else(|| unsupported("empty vector reduction"))?;
            for lane in &lanes[1..] {
                let ((bits, a), (_, b)) = (acc.scalar()?, lane.scalar()?);
                let folded = eval::binary(op, bits, a, b).ok_or_else(|| unsupported(name))?;
                acc = Value::int(bits, folded);
            }
            return Ok(Some(acc));
        }
        if family("objectsize") {
            let min = arg(1).ok().and_then(|v| v.as_u64()) == Some(1);
            return Ok(Some(Value::int(64, if min { 0 } else { u64::MAX })));
        }
        let unary = |f: fn(u32, u64) -> u64| -> Result<Option<Value>> {
            let apply = |lane: &Value| -> Result<Value> {
                let (bits, value) = lane.scalar()?;
                Ok(Value::int(bits, f(bits, value)))
            };
            match arg(0)? {
                Value::Vector(lanes) => {
                    let lanes = lanes.iter().map(apply).collect::<Result<Vec<_>>>()?;
                    Ok(Some(Value::Vector(lanes)))
                }
                scalar => apply(scalar).map(Some),
            }
        };
        if family("ctpop") {
            return unary(|_, v| u64::from(v.count_ones()));
        }
        if family("ctlz") {
            return unary(|bits, v| u64::from(v.leading_zeros() - (64 - bits)));
        }
        if family("cttz") {
            return unary(|bits, v| u64::from(v.trailing_zeros().min(bits)));
        }
        if family("bswap") {
            return unary(|bits, v| v.swap_bytes() >> (64 - bits));
        }
        if family("abs") {
            return unary(|bits, v| sign_extend(v, bits).unsigned_abs());
        }
        Err(unsupported(format!("intrinsic @{name}")))
    }
}

fn value_size(value: &Value) -> u64 {
    match value {
        Value::Int { bits, .. } => u64::from(bits.div_ceil(8)),
        Value::Ptr(_) => 8,
        Value::Vector(lanes) => lanes.iter().map(value_size).sum(),
    }
}

fn zero(ty: &Type) -> Result<Value> {
    match ty {
        Type::Int(bits) => Ok(Value::int(*bits, 0)),
        Type::Ptr => Ok(Value::Ptr(0)),
        Type::Vector { elem, lanes } => Ok(Value::Vector(vec![zero(elem)?; *lanes as usize])),
        _ => Err(unsupported(format!("value of type {ty}"))),
    }
}

fn lanewise(
    lhs: &Value,
    rhs: &Value,
    mut f: impl FnMut(&Value, &Value) -> Result<Value>,
) -> Result<Value> {
    match (lhs, rhs) {
        (Value::Vector(a), Value::Vector(b)) => a
            .iter()
            .zip(b)
            .map(|(a, b)| f(a, b))
            .collect::<Result<Vec<_>>>()
            .map(Value::Vector),
        _ => f(lhs, rhs),
    }
}

/// Integer width of a vector whose lanes are stored bit-packed.
fn packed_width(lanes: &[Value]) -> Option<u32> {
    lanes.iter().try_fold(0, |width, lane| match lane {
        Value::Int { bits, .. } if bits % 8 != 0 => Some(width + bits),
        _ => None,
    })
}

/// Reinterpret the bits of `value` as `target` when the lane counts differ.
/// Lane 0 holds the lowest bits.
fn reshape(value: &Value, target: &Type) -> Result<Value> {
    let source = match value {
        Value::Vector(lanes) => lanes.as_slice(),
        scalar => std::slice::from_ref(scalar),
    };
    let mut bits = Vec::new();
    for lane in source {
        let (width, raw) = lane.scalar()?;
        bits.extend((0..width).map(|i| (raw >> i) & 1 == 1));
    }
    let Type::Int(width) = *target.element() else {
        return Err(unsupported(format!("bitcast to {target}")));
    };
    let mut lanes: Vec<Value> = bits
        .chunks(width as usize)
        .map(|chunk| {
            let raw = chunk.iter().rev().fold(0u64, |acc, &bit| (acc << 1) | u64::from(bit));
            Value::int(width, raw)
        })
        .collect();
    if target.is_vector() {
        Ok(Value::Vector(lanes))
    } else {
        lanes
            .pop()
            .ok_or_else(|| unsupported(format!("bitcast to {target}")))
    }
}

fn cast(op: CastOp, value: &Value, target: &Type) -> Result<Value> {
    let (from, raw) = value.scalar()?;
    match (op, target) {
        (CastOp::IntToPtr | CastOp::Bitcast, Type::Ptr) => Ok(Value::Ptr(raw)),
        (_, Type::Int(to)) => Ok(Value::int(*to, eval::cast(op, from, *to, raw))),
        _ => Err(unsupported(format!("{op} to {target}"))),
    }
}

fn rmw(op: RmwOp, old: &Value, operand: &Value) -> Result<Value> {
    let ((bits, a), (_, b)) = (old.scalar()?, operand.scalar()?);
    let (sa, sb) = (sign_extend(a, bits), sign_extend(b, bits));
    let value = match op {
        RmwOp::Xchg => b,
        RmwOp::Add => a.wrapping_add(b),
        RmwOp::Sub => a.wrapping_sub(b),
        RmwOp::And => a & b,
        RmwOp::Nand => !(a & b),
        RmwOp::Or => a | b,
        RmwOp::Xor => a ^ b,
        RmwOp::Max => if sa >= sb { a } else { b },
        RmwOp::Min => if sa <= sb { a } else { b },
        RmwOp::UMax => a.max(b),
        RmwOp::UMin => a.min(b),
    };
    Ok(match old {
        Value::Ptr(_) => Value::Ptr(value),
        _ => Value::int(bits, value),
    })
}

// =============================================================================
// Counters and checks
// =============================================================================

/// Count instructions in all functions of `module` matching `pred`.
pub fn count_instructions(module: &Module, pred: impl Fn(&Instruction) -> bool) -> usize {
    module
        .functions
        .iter()
        .flat_map(Function::instructions)
        .filter(|inst| pred(inst))
        .count()
}

/// Count `op` instructions in `func`.
pub fn count_binary(func: &Function, op: BinOp) -> usize {
    func.instructions()
        .filter(|inst| matches!(&inst.kind, InstKind::Binary { op: o, .. } if *o == op))
        .count()
}

/// Right-hand constants of the `icmp pred` instructions of `func`, in layout
/// order.
pub fn icmp_constants(func: &Function, pred: IntPredicate) -> Vec<u64> {
    func.instructions()
        .filter_map(|inst| match &inst.kind {
            InstKind::ICmp { pred: p, rhs, .. } if *p == pred => rhs.as_int().map(|(_, v)| v),
            _ => None,
        })
        .collect()
}

/// Number of `switch` terminators in the module.
pub fn count_switches(module: &Module) -> usize {
    module
        .functions
        .iter()
        .flat_map(|f| &f.blocks)
        .filter(|b| matches!(b.term, Terminator::Switch { .. }))
        .count()
}

/// Rendered instructions that carry a vector operand or result, other than
/// the element accessors and calls to non-intrinsic functions.
pub fn vector_typed_instructions(module: &Module) -> Vec<String> {
    let mut found = Vec::new();
    for func in &module.functions {
        for inst in func.instructions() {
            let plain_call =
                matches!(inst.kind, InstKind::Call { .. }) && inst.intrinsic_name().is_none();
            if plain_call
                || matches!(
                    inst.kind,
                    InstKind::ExtractElement { .. } | InstKind::InsertElement { .. }
                )
            {
                continue;
            }
            let vector_operand = inst
                .operands()
                .into_iter()
                .any(|op| func.operand_type(op).is_vector());
            if inst.ty.is_vector() || vector_operand {
                found.push(format!("@{}: {inst}", func.name));
            }
        }
    }
    found
}

/// Rendered instructions `kind` should protect that no guard dominates.
///
/// A guard is a dominating block ending in `br (icmp ...), abort, cont` where
/// the comparison tests the instruction's right operand, `abort` calls the
/// report hook and ends in `unreachable`, and `cont` dominates the
/// instruction.
pub fn unguarded_operations(module: &Module, kind: GuardKind) -> Vec<String> {
    let mut found = Vec::new();
    for func in module.definitions() {
        let doms = func.dominators();
        for block in &func.blocks {
            if !doms.is_reachable(block.id) {
                continue;
            }
            for inst in &block.insts {
                let InstKind::Binary { op, rhs, .. } = &inst.kind else {
                    continue;
                };
                let Some(width) = inst.ty.int_width().filter(|_| inst.ty.is_int()) else {
                    continue;
                };
                if !is_guarded_op(kind, *op) || !needs_guard(kind, rhs, width) {
                    continue;
                }
                if !is_guarded(func, &doms, block.id, kind, rhs, width) {
                    found.push(format!("@{}: {inst}", func.name));
                }
            }
        }
    }
    found
}

fn needs_guard(kind: GuardKind, rhs: &Operand, width: u32) -> bool {
    match (kind, rhs.as_int()) {
        (GuardKind::DivZero, Some((_, divisor))) => divisor == 0,
        (GuardKind::Overshift, Some((_, amount))) => amount >= u64::from(width),
        (_, None) => true,
    }
}

fn is_guarded(
    func: &Function,
    doms: &Dominators,
    target: BlockId,
    kind: GuardKind,
    rhs: &Operand,
    width: u32,
) -> bool {
    let expected = match kind {
        GuardKind::DivZero => (IntPredicate::Eq, 0),
        GuardKind::Overshift => (IntPredicate::Uge, u64::from(width)),
    };
    let hook = kind.report_hook();
    let mut current = target;
    while let Some(idom) = doms.immediate_dominator(current) {
        current = idom;
        let Some(block) = func.block(idom) else {
            break;
        };
        let Terminator::CondBr {
            cond,
            then_dest,
            else_dest,
        } = &block.term
        else {
            continue;
        };
        let tests_operand = block.insts.iter().any(|inst| {
            inst.result.is_some()
                && cond.as_value() == inst.result
                && matches!(
                    &inst.kind,
                    InstKind::ICmp { pred, lhs, rhs: bound }
                        if (*pred, bound.as_int().map(|(_, v)| v)) == (expected.0, Some(expected.1))
                            && lhs == rhs
                )
        });
        let aborts = func.block(*then_dest).is_some_and(|abort| {
            abort.term == Terminator::Unreachable
                && abort
                    .insts
                    .iter()
                    .any(|i| i.called_function() == Some(hook.as_str()))
        });
        if tests_operand && aborts && doms.dominates(*else_dest, target) {
            return true;
        }
    }
    false
}

// =============================================================================
// Sample modules
// =============================================================================

/// `i32 name(i32 x, i32 y) { return x op y; }`
pub fn binary_module(name: &str, op: BinOp) -> Module {
    let mut b = FunctionBuilder::new(name, &[Type::I32, Type::I32], Type::I32);
    let (x, y) = (b.param(0), b.param(1));
    let r = b.binary(op, x, y);
    b.ret(Some(r));
    let mut module = Module::new("sample");
    module.functions.push(b.finish());
    module
}

/// `i32 main(i32 x)` switching on `x`: each `(case, result)` returns
/// `result`, anything else returns `default`. Cases with equal results share
/// a destination block, and results meet in a PHI.
pub fn switch_module(cases: &[(u64, u64)], default: u64) -> Module {
    let mut b = FunctionBuilder::new("main", &[Type::I32], Type::I32);
    let x = b.param(0);
    let default_block = b.new_block();
    let exit = b.new_block();
    let mut dests: Vec<(u64, BlockId)> = Vec::new();
    let mut switch_cases = Vec::with_capacity(cases.len());
    for &(case, result) in cases {
        let dest = match dests.iter().find(|(r, _)| *r == result) {
            Some((_, dest)) => *dest,
            None => {
                let dest = b.new_block();
                dests.push((result, dest));
                dest
            }
        };
        switch_cases.push((truncate_to(case, 32), dest));
    }
    b.switch(x, default_block, switch_cases);
    let mut incoming = vec![(Operand::int(32, default), default_block)];
    b.switch_to(default_block);
    b.br(exit);
    for &(result, dest) in &dests {
        b.switch_to(dest);
        b.br(exit);
        incoming.push((Operand::int(32, result), dest));
    }
    b.switch_to(exit);
    let r = b.phi(Type::I32, incoming);
    b.ret(Some(r));
    let mut module = Module::new("sample");
    module.functions.push(b.finish());
    module
}

/// `i32 main(i32 x)`: splat `x` into a `<lanes x i32>`, add `<1, 2, ...>`,
/// multiply by itself and return the sum of the lanes via
/// `llvm.vector.reduce.add`.
pub fn vector_module(lanes: u32) -> Module {
    let vec_ty = Type::vector(Type::I32, lanes);
    let mut b = FunctionBuilder::new("main", &[Type::I32], Type::I32);
    let x = b.param(0);
    let mut v = Operand::undef(vec_ty.clone());
    for lane in 0..lanes {
        v = b.insert_element(v, x.clone(), lane);
    }
    let steps = Operand::Const(Constant::Vector(
        (1..=u64::from(lanes)).map(|i| Constant::int(32, i)).collect(),
    ));
    let sum = b.binary(BinOp::Add, v, steps);
    let sq = b.binary(BinOp::Mul, sum.clone(), sum);
    let reduce = format!("llvm.vector.reduce.add.v{lanes}i32");
    let r = b.call(&reduce, vec![sq], Type::I32);
    b.ret(r);
    let mut module = Module::new("sample");
    module.functions.push(b.finish());
    module
}

/// Two identical `i32 (i32)` functions `twin_a`/`twin_b` computing
/// `x * 3 + 1`, and `main(x) = twin_a(x) + twin_b(x)`.
pub fn twin_module() -> Module {
    let twin = |name: &str| {
        let mut b = FunctionBuilder::new(name, &[Type::I32], Type::I32);
        let x = b.param(0);
        let m = b.binary(BinOp::Mul, x, Operand::int(32, 3));
        let r = b.binary(BinOp::Add, m, Operand::int(32, 1));
        b.ret(Some(r));
        b.finish()
    };
    let mut b = FunctionBuilder::new("main", &[Type::I32], Type::I32);
    let x = b.param(0);
    let a = b.call("twin_a", vec![x.clone()], Type::I32).expect("i32 call");
    let c = b.call("twin_b", vec![x], Type::I32).expect("i32 call");
    let r = b.binary(BinOp::Add, a, c);
    b.ret(Some(r));

    let mut module = Module::new("sample");
    module.functions.push(twin("twin_a"));
    module.functions.push(twin("twin_b"));
    module.functions.push(b.finish());
    module
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(module: &Module, name: &str, args: &[u64]) -> Outcome {
        let args = args.iter().map(|v| Value::int(32, *v)).collect();
        Evaluator::new(module).run(name, args).expect("evaluates")
    }

    #[test]
    fn evaluates_switch_through_phi() {
        let module = switch_module(&[(1, 10), (2, 20), (3, 10)], 7);
        assert_eq!(run(&module, "main", &[1]).returned_u64(), Some(10));
        assert_eq!(run(&module, "main", &[2]).returned_u64(), Some(20));
        assert_eq!(run(&module, "main", &[3]).returned_u64(), Some(10));
        assert_eq!(run(&module, "main", &[9]).returned_u64(), Some(7));
    }

    #[test]
    fn evaluates_vectors_and_reductions() {
        // x = 1, lanes 4: (2^2 + 3^2 + 4^2 + 5^2) = 54
        let module = vector_module(4);
        assert_eq!(run(&module, "main", &[1]).returned_u64(), Some(54));
    }

    #[test]
    fn unguarded_division_by_zero_is_an_error() {
        let module = binary_module("f", BinOp::UDiv);
        let mut eval = Evaluator::new(&module);
        let err = eval
            .run("f", vec![Value::int(32, 1), Value::int(32, 0)])
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert_eq!(unguarded_operations(&module, GuardKind::DivZero).len(), 1);
    }

    #[test]
    fn memory_round_trips_through_alloca() {
        let mut b = FunctionBuilder::new("main", &[Type::I32], Type::I32);
        let x = b.param(0);
        let slot = b.alloca(Type::I32);
        b.store(x, slot.clone());
        let v = b.load(Type::I32, slot);
        b.ret(Some(v));
        let mut module = Module::new("m");
        module.functions.push(b.finish());
        assert_eq!(run(&module, "main", &[0xdead_beef]).returned_u64(), Some(0xdead_beef));
    }
}
