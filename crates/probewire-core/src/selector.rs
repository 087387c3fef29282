//! Path-like selectors over element documents.
//!
//! A [`Selector`] is an ordered list of [`Step`]s. Each step holds predicates
//! on attributes, a depth bound (`maxdepth`, default 1) and an optional
//! `instance` index. Evaluation starts from a root node; each step replaces
//! the match set with every node within `maxdepth` levels below any current
//! match that satisfies all of the step's predicates.
//!
//! # Forms
//!
//! Wire form, as carried in `find_controls` params:
//!
//! ```text
//! [{"name": ["=", "ok"], "maxdepth": ["=", 2]}, {"class": ["~=", "Button.*"], "instance": ["=", 0]}]
//! ```
//!
//! Text form, accepted by [`Selector::parse`] and produced by `Display`:
//!
//! ```text
//! /name='ok' && maxdepth=2 /class~='Button.*' && instance=0
//! ```
//!
//! Attribute names are case-insensitive. `=` compares strings exactly; `~=`
//! is a regular expression anchored at the start of the attribute value.

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::document::{NodeHandle, NodeRef};

const MAXDEPTH: &str = "maxdepth";
const INSTANCE: &str = "instance";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A selector could not be built.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectorError {
    #[error("selector must be a list of step objects")]
    NotAList,

    #[error("step {0} is not an object")]
    StepNotAnObject(usize),

    #[error("predicate {attr:?} must be an [operator, value] pair")]
    MalformedPredicate { attr: String },

    #[error("unknown operator {0:?}")]
    UnknownOperator(String),

    #[error("invalid regular expression {pattern:?}: {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("{key} must be an integer, got {value}")]
    NotAnInteger { key: &'static str, value: String },

    #[error("{key} only supports the '=' operator")]
    ControlKeyOperator { key: &'static str },

    #[error("maxdepth must not be negative, got {0}")]
    NegativeDepth(i64),

    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
}

/// A selector ran but did not single out one node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    #[error("no control matches")]
    NotFound,

    #[error("{0} controls match")]
    Ambiguous(usize),

    #[error("instance {instance} is out of range for {available} match(es)")]
    InstanceOutOfRange { instance: i64, available: usize },
}

// ---------------------------------------------------------------------------
// Predicates and steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`
    Equals,
    /// `~=`
    Matches,
}

impl Operator {
    fn parse(op: &str) -> Result<Self, SelectorError> {
        match op {
            "=" => Ok(Operator::Equals),
            "~=" => Ok(Operator::Matches),
            other => Err(SelectorError::UnknownOperator(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::Matches => "~=",
        }
    }
}

/// One attribute test.
#[derive(Debug, Clone)]
pub struct Predicate {
    attr: String,
    op: Operator,
    value: String,
    regex: Option<Regex>,
}

impl Predicate {
    pub fn equals(attr: &str, value: impl Into<String>) -> Self {
        Self {
            attr: attr.to_ascii_lowercase(),
            op: Operator::Equals,
            value: value.into(),
            regex: None,
        }
    }

    pub fn matches(attr: &str, pattern: impl Into<String>) -> Result<Self, SelectorError> {
        let pattern = pattern.into();
        let regex = Regex::new(&format!("^(?:{pattern})")).map_err(|e| SelectorError::InvalidRegex {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            attr: attr.to_ascii_lowercase(),
            op: Operator::Matches,
            value: pattern,
            regex: Some(regex),
        })
    }

    fn new(attr: &str, op: Operator, value: String) -> Result<Self, SelectorError> {
        match op {
            Operator::Equals => Ok(Self::equals(attr, value)),
            Operator::Matches => Self::matches(attr, value),
        }
    }

    pub fn attr(&self) -> &str {
        &self.attr
    }

    pub fn op(&self) -> Operator {
        self.op
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// A node missing the attribute never satisfies the predicate.
    pub fn test(&self, node: &NodeRef<'_>) -> bool {
        let Some(actual) = node.attr(&self.attr) else {
            return false;
        };
        match &self.regex {
            Some(regex) => regex.is_match(actual),
            None => actual == self.value,
        }
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        self.attr == other.attr && self.op == other.op && self.value == other.value
    }
}

/// One path segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    predicates: Vec<Predicate>,
    max_depth: usize,
    instance: Option<i64>,
}

impl Default for Step {
    fn default() -> Self {
        Self {
            predicates: Vec::new(),
            max_depth: 1,
            instance: None,
        }
    }
}

impl Step {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Search up to `depth` levels below each current match. `0` acts as `1`.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    /// Keep only the match at `index`; negative indexes count from the end.
    pub fn instance(mut self, index: i64) -> Self {
        self.instance = Some(index);
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn depth(&self) -> usize {
        self.max_depth
    }

    pub fn instance_index(&self) -> Option<i64> {
        self.instance
    }

    fn accepts(&self, node: &NodeRef<'_>) -> bool {
        self.predicates.iter().all(|p| p.test(node))
    }

    fn set_control(&mut self, key: &'static str, value: i64) -> Result<(), SelectorError> {
        if key == MAXDEPTH {
            if value < 0 {
                return Err(SelectorError::NegativeDepth(value));
            }
            *self = std::mem::take(self).max_depth(value as usize);
        } else {
            self.instance = Some(value);
        }
        Ok(())
    }
}

fn control_key(name: &str) -> Option<&'static str> {
    if name.eq_ignore_ascii_case(MAXDEPTH) {
        Some(MAXDEPTH)
    } else if name.eq_ignore_ascii_case(INSTANCE) {
        Some(INSTANCE)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// An ordered list of steps.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selector {
    steps: Vec<Step>,
}

impl Selector {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Parse the text form.
    pub fn parse(text: &str) -> Result<Self, SelectorError> {
        Parser::new(text).selector()
    }

    /// Build from the wire form.
    pub fn from_value(value: &Value) -> Result<Self, SelectorError> {
        let Value::Array(raw_steps) = value else {
            return Err(SelectorError::NotAList);
        };
        let mut steps = Vec::with_capacity(raw_steps.len());
        for (i, raw) in raw_steps.iter().enumerate() {
            let Value::Object(fields) = raw else {
                return Err(SelectorError::StepNotAnObject(i));
            };
            let mut step = Step::new();
            for (name, pair) in fields {
                let (op, operand) = match pair.as_array().map(Vec::as_slice) {
                    Some([Value::String(op), operand]) => (Operator::parse(op)?, operand),
                    _ => {
                        return Err(SelectorError::MalformedPredicate { attr: name.clone() });
                    }
                };
                if let Some(key) = control_key(name) {
                    if op != Operator::Equals {
                        return Err(SelectorError::ControlKeyOperator { key });
                    }
                    let n = operand.as_i64().ok_or_else(|| SelectorError::NotAnInteger {
                        key,
                        value: operand.to_string(),
                    })?;
                    step.set_control(key, n)?;
                } else {
                    let Value::String(text) = operand else {
                        return Err(SelectorError::MalformedPredicate { attr: name.clone() });
                    };
                    step.predicates.push(Predicate::new(name, op, text.clone())?);
                }
            }
            steps.push(step);
        }
        Ok(Self { steps })
    }

    /// The wire form.
    pub fn to_value(&self) -> Value {
        let steps = self
            .steps
            .iter()
            .map(|step| {
                let mut fields = Map::new();
                for p in &step.predicates {
                    fields.insert(p.attr.clone(), json!([p.op.as_str(), p.value]));
                }
                if step.max_depth != 1 {
                    fields.insert(MAXDEPTH.into(), json!(["=", step.max_depth]));
                }
                if let Some(instance) = step.instance {
                    fields.insert(INSTANCE.into(), json!(["=", instance]));
                }
                Value::Object(fields)
            })
            .collect();
        Value::Array(steps)
    }

    /// Every node the selector reaches from `root`, in traversal order.
    ///
    /// Each step searches below every node the previous step produced. An
    /// `instance` narrows the matches of each parent separately, so a step
    /// with `instance` still yields one node per parent. An empty selector
    /// yields `root` itself. Only an out-of-range `instance` is an error; an
    /// empty result is not.
    pub fn evaluate(&self, root: NodeRef<'_>) -> Result<Vec<NodeHandle>, LocateError> {
        let mut current = vec![root];
        for step in &self.steps {
            if current.is_empty() {
                break;
            }
            let mut seen = HashSet::new();
            let mut next = Vec::new();
            for parent in &current {
                let matched: Vec<NodeRef<'_>> = parent
                    .descendants(step.max_depth)
                    .filter(|candidate| step.accepts(candidate))
                    .collect();
                let picked = match step.instance {
                    Some(instance) => vec![pick_instance(&matched, instance)?],
                    None => matched,
                };
                for node in picked {
                    if seen.insert(node.handle()) {
                        next.push(node);
                    }
                }
            }
            current = next;
        }
        Ok(current.iter().map(NodeRef::handle).collect())
    }

    /// Resolve to exactly one node.
    pub fn locate(&self, root: NodeRef<'_>) -> Result<NodeHandle, LocateError> {
        exactly_one(self.evaluate(root)?)
    }
}

fn pick_instance<'a>(matched: &[NodeRef<'a>], instance: i64) -> Result<NodeRef<'a>, LocateError> {
    let available = matched.len();
    let index = if instance < 0 {
        available.checked_sub(instance.unsigned_abs() as usize)
    } else {
        Some(instance as usize).filter(|&i| i < available)
    };
    index
        .map(|i| matched[i])
        .ok_or(LocateError::InstanceOutOfRange { instance, available })
}

/// Collapse a match list to its single element.
pub fn exactly_one(matches: Vec<NodeHandle>) -> Result<NodeHandle, LocateError> {
    match matches.as_slice() {
        [] => Err(LocateError::NotFound),
        [only] => Ok(*only),
        many => Err(LocateError::Ambiguous(many.len())),
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str("/")?;
            let mut clauses = step
                .predicates
                .iter()
                .map(|p| format!("{}{}'{}'", p.attr, p.op.as_str(), p.value.replace('\\', "\\\\").replace('\'', "\\'")))
                .collect::<Vec<_>>();
            if step.max_depth != 1 {
                clauses.push(format!("{MAXDEPTH}={}", step.max_depth));
            }
            if let Some(instance) = step.instance {
                clauses.push(format!("{INSTANCE}={instance}"));
            }
            f.write_str(&clauses.join(" && "))?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, SelectorError> {
        Selector::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Text parser
// ---------------------------------------------------------------------------

enum Operand {
    Text(String),
    Integer(i64),
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> SelectorError {
        SelectorError::Syntax {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn selector(mut self) -> Result<Selector, SelectorError> {
        let mut steps = Vec::new();
        self.skip_ws();
        while self.peek().is_some() {
            if !self.eat("/") {
                return Err(self.error("expected '/' to start a step"));
            }
            steps.push(self.step()?);
            self.skip_ws();
        }
        Ok(Selector { steps })
    }

    fn step(&mut self) -> Result<Step, SelectorError> {
        let mut step = Step::new();
        loop {
            self.skip_ws();
            let name = self.ident()?;
            self.skip_ws();
            let op = if self.eat("~=") {
                Operator::Matches
            } else if self.eat("=") {
                Operator::Equals
            } else {
                return Err(self.error("expected '=' or '~='"));
            };
            self.skip_ws();
            let operand = self.operand()?;

            match (control_key(name), operand) {
                (Some(key), Operand::Integer(n)) => {
                    if op != Operator::Equals {
                        return Err(SelectorError::ControlKeyOperator { key });
                    }
                    step.set_control(key, n)?;
                }
                (Some(key), Operand::Text(text)) => {
                    return Err(SelectorError::NotAnInteger { key, value: text });
                }
                (None, Operand::Text(text)) => step.predicates.push(Predicate::new(name, op, text)?),
                (None, Operand::Integer(n)) => {
                    step.predicates.push(Predicate::new(name, op, n.to_string())?)
                }
            }

            self.skip_ws();
            if !self.eat("&&") {
                return Ok(step);
            }
        }
    }

    fn ident(&mut self) -> Result<&'a str, SelectorError> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected an attribute name"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn operand(&mut self) -> Result<Operand, SelectorError> {
        match self.peek() {
            Some(quote @ ('\'' | '"')) => {
                self.pos += 1;
                let mut text = String::new();
                let mut chars = self.rest().char_indices();
                while let Some((i, c)) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => text.push(escaped),
                            None => break,
                        },
                        c if c == quote => {
                            self.pos += i + 1;
                            return Ok(Operand::Text(text));
                        }
                        c => text.push(c),
                    }
                }
                Err(self.error("unterminated string"))
            }
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let rest = self.rest();
                let len = rest
                    .char_indices()
                    .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                let n = rest[..len]
                    .parse()
                    .map_err(|_| self.error(format!("invalid integer {:?}", &rest[..len])))?;
                self.pos += len;
                Ok(Operand::Integer(n))
            }
            _ => Err(self.error("expected a quoted string or an integer")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
