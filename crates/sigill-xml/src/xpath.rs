#![forbid(unsafe_code)]

//! XPath 1.0 subset for XML-DSig processing.
//!
//! Covers what signature transforms actually use: location paths over the
//! child, descendant(-or-self), self, parent, ancestor(-or-self), sibling
//! and attribute axes; name, `prefix:name`, `*`, `text()`, `node()`,
//! `comment()` and `processing-instruction()` tests; predicates;
//! `|`, `and`, `or`, comparisons; and the core functions signatures rely on
//! (`not`, `id`, `here`, `count`, `string`, `name`, `local-name`, ...).
//! Namespace nodes are not addressable.

use crate::document::{attribute_qname, qualified_name};
use roxmltree::{Document, Node, NodeId};
use sigill_core::Error;
use std::collections::HashMap;

/// A node in the XPath data model: a tree node or an attribute of an
/// element (by index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XNode {
    Node(NodeId),
    Attr(NodeId, usize),
}

impl XNode {
    fn order_key(&self) -> (u32, usize) {
        match self {
            XNode::Node(id) => (id.get(), 0),
            XNode::Attr(id, i) => (id.get(), i + 1),
        }
    }

    /// The owning tree node (the element itself for attributes).
    pub fn tree_id(&self) -> NodeId {
        match self {
            XNode::Node(id) | XNode::Attr(id, _) => *id,
        }
    }
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nodes(Vec<XNode>),
    Bool(bool),
    Num(f64),
    Str(String),
}

/// Evaluation environment: the document, prefix bindings, the ID map for
/// `id()` and the node returned by `here()`.
pub struct XPathContext<'a, 'input> {
    doc: &'a Document<'input>,
    namespaces: HashMap<String, String>,
    ids: Option<&'a HashMap<String, NodeId>>,
    here: Option<NodeId>,
}

impl<'a, 'input> XPathContext<'a, 'input> {
    pub fn new(doc: &'a Document<'input>) -> Self {
        Self {
            doc,
            namespaces: HashMap::new(),
            ids: None,
            here: None,
        }
    }

    pub fn with_namespace(mut self, prefix: &str, uri: &str) -> Self {
        self.namespaces.insert(prefix.to_owned(), uri.to_owned());
        self
    }

    /// Bind every in-scope namespace of `element` (typically the
    /// `XPath` parameter element of a transform).
    pub fn with_namespaces_of(mut self, element: Node<'_, '_>) -> Self {
        for ns in element.namespaces() {
            if let Some(prefix) = ns.name() {
                self.namespaces.insert(prefix.to_owned(), ns.uri().to_owned());
            }
        }
        self
    }

    pub fn with_ids(mut self, ids: &'a HashMap<String, NodeId>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_here(mut self, here: NodeId) -> Self {
        self.here = Some(here);
        self
    }

    fn node(&self, id: NodeId) -> Result<Node<'a, 'input>, Error> {
        self.doc
            .get_node(id)
            .ok_or_else(|| Error::Transform(format!("XPath: dangling node id {id:?}")))
    }

    fn attr(&self, id: NodeId, i: usize) -> Result<roxmltree::Attribute<'a, 'input>, Error> {
        self.node(id)?
            .attributes()
            .nth(i)
            .ok_or_else(|| Error::Transform("XPath: dangling attribute".into()))
    }
}

/// A parsed XPath expression.
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl XPath {
    pub fn parse(source: &str) -> Result<Self, Error> {
        let tokens = lex(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::Transform(format!(
                "XPath: unexpected trailing input in {source:?}"
            )));
        }
        Ok(Self {
            source: source.to_owned(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with `node` as the context node (position 1 of 1).
    pub fn evaluate(&self, ctx: &XPathContext<'_, '_>, node: XNode) -> Result<Value, Error> {
        eval(
            &self.expr,
            ctx,
            &Focus {
                node,
                position: 1,
                size: 1,
            },
        )
    }

    /// Evaluate and require a node-set, returned in document order.
    pub fn select(&self, ctx: &XPathContext<'_, '_>, node: XNode) -> Result<Vec<XNode>, Error> {
        match self.evaluate(ctx, node)? {
            Value::Nodes(nodes) => Ok(nodes),
            other => Err(Error::Transform(format!(
                "XPath {:?} yields {other:?}, not a node-set",
                self.source
            ))),
        }
    }

    /// Evaluate and convert to a boolean.
    pub fn matches(&self, ctx: &XPathContext<'_, '_>, node: XNode) -> Result<bool, Error> {
        Ok(boolean(&self.evaluate(ctx, node)?))
    }
}

// ── Lexer ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Pipe,
    Dot,
    DotDot,
    ColonColon,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Literal(String),
    Number(f64),
    Name(String),
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn lex(src: &str) -> Result<Vec<Tok>, Error> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '/' if next == Some('/') => {
                out.push(Tok::DoubleSlash);
                i += 2;
            }
            '/' => {
                out.push(Tok::Slash);
                i += 1;
            }
            '[' => {
                out.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                out.push(Tok::RBracket);
                i += 1;
            }
            '(' => {
                out.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                out.push(Tok::RParen);
                i += 1;
            }
            '@' => {
                out.push(Tok::At);
                i += 1;
            }
            ',' => {
                out.push(Tok::Comma);
                i += 1;
            }
            '|' => {
                out.push(Tok::Pipe);
                i += 1;
            }
            '+' => {
                out.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                out.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                out.push(Tok::Star);
                i += 1;
            }
            '=' => {
                out.push(Tok::Eq);
                i += 1;
            }
            '!' if next == Some('=') => {
                out.push(Tok::NotEq);
                i += 2;
            }
            '<' if next == Some('=') => {
                out.push(Tok::Le);
                i += 2;
            }
            '<' => {
                out.push(Tok::Lt);
                i += 1;
            }
            '>' if next == Some('=') => {
                out.push(Tok::Ge);
                i += 2;
            }
            '>' => {
                out.push(Tok::Gt);
                i += 1;
            }
            ':' if next == Some(':') => {
                out.push(Tok::ColonColon);
                i += 2;
            }
            '.' if next == Some('.') => {
                out.push(Tok::DotDot);
                i += 2;
            }
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => {
                out.push(Tok::Dot);
                i += 1;
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&x| x == c)
                    .ok_or_else(|| Error::Transform(format!("XPath: unterminated literal in {src:?}")))?;
                out.push(Tok::Literal(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| Error::Transform(format!("XPath: bad number {text:?}")))?;
                out.push(Tok::Number(n));
            }
            c if is_name_start(c) => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                // QName: a single ':' followed by an NCName or '*'.
                if chars.get(i) == Some(&':') && chars.get(i + 1) != Some(&':') {
                    match chars.get(i + 1) {
                        Some('*') => i += 2,
                        Some(&n) if is_name_start(n) => {
                            i += 1;
                            while i < chars.len() && is_name_char(chars[i]) {
                                i += 1;
                            }
                        }
                        _ => {}
                    }
                }
                out.push(Tok::Name(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::Transform(format!(
                    "XPath: unexpected character {other:?} in {src:?}"
                )))
            }
        }
    }
    Ok(out)
}

// ── AST ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Parent,
    Ancestor,
    AncestorOrSelf,
    SelfAxis,
    Attribute,
    FollowingSibling,
    PrecedingSibling,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "self" => Axis::SelfAxis,
            "attribute" => Axis::Attribute,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Any,
    PrefixAny(String),
    Name(Option<String>, String),
    Node,
    Text,
    Comment,
    Pi,
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Union,
}

#[derive(Debug, Clone)]
enum Expr {
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Path { absolute: bool, steps: Vec<Step> },
    Filter {
        primary: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
    Literal(String),
    Number(f64),
    Call(String, Vec<Expr>),
}

// ── Parser ───────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + offset)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Name(n)) if n == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok) -> Result<(), Error> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(Error::Transform(format!(
                "XPath: expected {tok:?}, found {:?}",
                self.peek()
            )))
        }
    }

    fn expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.and_expr()?;
        while self.eat_keyword("or") {
            let rhs = self.and_expr()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.equality_expr()?;
        while self.eat_keyword("and") {
            let rhs = self.equality_expr()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn equality_expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.relational_expr()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Eq) => BinOp::Eq,
                Some(Tok::NotEq) => BinOp::NotEq,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.relational_expr()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn relational_expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.additive_expr()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Lt) => BinOp::Lt,
                Some(Tok::Le) => BinOp::Le,
                Some(Tok::Gt) => BinOp::Gt,
                Some(Tok::Ge) => BinOp::Ge,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.additive_expr()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn additive_expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.unary_expr()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary_expr()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary_expr(&mut self) -> Result<Expr, Error> {
        if self.eat(&Tok::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary_expr()?)));
        }
        let mut lhs = self.path_expr()?;
        while self.eat(&Tok::Pipe) {
            let rhs = self.path_expr()?;
            lhs = Expr::Binary(BinOp::Union, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn starts_primary(&self) -> bool {
        match self.peek() {
            Some(Tok::LParen | Tok::Literal(_) | Tok::Number(_)) => true,
            Some(Tok::Name(n)) => {
                self.peek_at(1) == Some(&Tok::LParen)
                    && !matches!(
                        n.as_str(),
                        "node" | "text" | "comment" | "processing-instruction"
                    )
            }
            _ => false,
        }
    }

    fn path_expr(&mut self) -> Result<Expr, Error> {
        if !self.starts_primary() {
            return self.location_path();
        }
        let primary = self.primary_expr()?;
        let mut predicates = Vec::new();
        while self.eat(&Tok::LBracket) {
            predicates.push(self.expr()?);
            self.expect(&Tok::RBracket)?;
        }
        let mut steps = Vec::new();
        loop {
            if self.eat(&Tok::Slash) {
                steps.push(self.step()?);
            } else if self.eat(&Tok::DoubleSlash) {
                steps.push(descendant_or_self_step());
                steps.push(self.step()?);
            } else {
                break;
            }
        }
        if predicates.is_empty() && steps.is_empty() {
            return Ok(primary);
        }
        Ok(Expr::Filter {
            primary: Box::new(primary),
            predicates,
            steps,
        })
    }

    fn primary_expr(&mut self) -> Result<Expr, Error> {
        match self.peek().cloned() {
            Some(Tok::LParen) => {
                self.pos += 1;
                let e = self.expr()?;
                self.expect(&Tok::RParen)?;
                Ok(e)
            }
            Some(Tok::Literal(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(s))
            }
            Some(Tok::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Tok::Name(name)) => {
                self.pos += 2;
                let mut args = Vec::new();
                if !self.eat(&Tok::RParen) {
                    loop {
                        args.push(self.expr()?);
                        if self.eat(&Tok::Comma) {
                            continue;
                        }
                        self.expect(&Tok::RParen)?;
                        break;
                    }
                }
                Ok(Expr::Call(name, args))
            }
            other => Err(Error::Transform(format!("XPath: unexpected {other:?}"))),
        }
    }

    fn location_path(&mut self) -> Result<Expr, Error> {
        let mut steps = Vec::new();
        let absolute = if self.eat(&Tok::Slash) {
            if !self.starts_step() {
                return Ok(Expr::Path {
                    absolute: true,
                    steps,
                });
            }
            true
        } else if self.eat(&Tok::DoubleSlash) {
            steps.push(descendant_or_self_step());
            true
        } else {
            false
        };
        steps.push(self.step()?);
        loop {
            if self.eat(&Tok::Slash) {
                steps.push(self.step()?);
            } else if self.eat(&Tok::DoubleSlash) {
                steps.push(descendant_or_self_step());
                steps.push(self.step()?);
            } else {
                break;
            }
        }
        Ok(Expr::Path { absolute, steps })
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Tok::Name(_) | Tok::Star | Tok::At | Tok::Dot | Tok::DotDot)
        )
    }

    fn step(&mut self) -> Result<Step, Error> {
        if self.eat(&Tok::Dot) {
            return Ok(Step {
                axis: Axis::SelfAxis,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }
        if self.eat(&Tok::DotDot) {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }
        let axis = if self.eat(&Tok::At) {
            Axis::Attribute
        } else if let (Some(Tok::Name(n)), Some(Tok::ColonColon)) = (self.peek(), self.peek_at(1)) {
            let axis = Axis::from_name(n)
                .ok_or_else(|| Error::Transform(format!("XPath: unsupported axis {n}")))?;
            self.pos += 2;
            axis
        } else {
            Axis::Child
        };
        let test = self.node_test()?;
        let mut predicates = Vec::new();
        while self.eat(&Tok::LBracket) {
            predicates.push(self.expr()?);
            self.expect(&Tok::RBracket)?;
        }
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn node_test(&mut self) -> Result<NodeTest, Error> {
        match self.peek().cloned() {
            Some(Tok::Star) => {
                self.pos += 1;
                Ok(NodeTest::Any)
            }
            Some(Tok::Name(name)) => {
                self.pos += 1;
                if self.peek() == Some(&Tok::LParen) {
                    let test = match name.as_str() {
                        "node" => NodeTest::Node,
                        "text" => NodeTest::Text,
                        "comment" => NodeTest::Comment,
                        "processing-instruction" => NodeTest::Pi,
                        _ => {
                            return Err(Error::Transform(format!(
                                "XPath: {name}() is not a node test"
                            )))
                        }
                    };
                    self.pos += 1;
                    // processing-instruction('target') is accepted, target ignored
                    if let Some(Tok::Literal(_)) = self.peek() {
                        self.pos += 1;
                    }
                    self.expect(&Tok::RParen)?;
                    return Ok(test);
                }
                Ok(match name.split_once(':') {
                    Some((prefix, "*")) => NodeTest::PrefixAny(prefix.to_owned()),
                    Some((prefix, local)) => {
                        NodeTest::Name(Some(prefix.to_owned()), local.to_owned())
                    }
                    None => NodeTest::Name(None, name),
                })
            }
            other => Err(Error::Transform(format!(
                "XPath: expected node test, found {other:?}"
            ))),
        }
    }
}

fn descendant_or_self_step() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        test: NodeTest::Node,
        predicates: Vec::new(),
    }
}

// ── Evaluation ───────────────────────────────────────────────────────

struct Focus {
    node: XNode,
    position: usize,
    size: usize,
}

fn eval(expr: &Expr, ctx: &XPathContext<'_, '_>, focus: &Focus) -> Result<Value, Error> {
    match expr {
        Expr::Literal(s) => Ok(Value::Str(s.clone())),
        Expr::Number(n) => Ok(Value::Num(*n)),
        Expr::Neg(e) => Ok(Value::Num(-number(ctx, &eval(e, ctx, focus)?)?)),
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, ctx, focus),
        Expr::Path { absolute, steps } => {
            let start = if *absolute {
                XNode::Node(ctx.doc.root().id())
            } else {
                focus.node
            };
            Ok(Value::Nodes(apply_steps(ctx, vec![start], steps)?))
        }
        Expr::Filter {
            primary,
            predicates,
            steps,
        } => {
            let mut nodes = match eval(primary, ctx, focus)? {
                Value::Nodes(n) => n,
                other => {
                    return Err(Error::Transform(format!(
                        "XPath: cannot filter non-node-set {other:?}"
                    )))
                }
            };
            for pred in predicates {
                nodes = apply_predicate(ctx, nodes, pred)?;
            }
            Ok(Value::Nodes(apply_steps(ctx, nodes, steps)?))
        }
        Expr::Call(name, args) => call(name, args, ctx, focus),
    }
}

fn eval_binary(
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &XPathContext<'_, '_>,
    focus: &Focus,
) -> Result<Value, Error> {
    match op {
        BinOp::Or => {
            if boolean(&eval(lhs, ctx, focus)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(boolean(&eval(rhs, ctx, focus)?)))
        }
        BinOp::And => {
            if !boolean(&eval(lhs, ctx, focus)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(boolean(&eval(rhs, ctx, focus)?)))
        }
        BinOp::Union => {
            let (a, b) = (eval(lhs, ctx, focus)?, eval(rhs, ctx, focus)?);
            match (a, b) {
                (Value::Nodes(mut a), Value::Nodes(b)) => {
                    a.extend(b);
                    Ok(Value::Nodes(document_order(a)))
                }
                _ => Err(Error::Transform("XPath: union of non-node-sets".into())),
            }
        }
        BinOp::Add | BinOp::Sub => {
            let a = number(ctx, &eval(lhs, ctx, focus)?)?;
            let b = number(ctx, &eval(rhs, ctx, focus)?)?;
            Ok(Value::Num(if matches!(op, BinOp::Add) { a + b } else { a - b }))
        }
        _ => {
            let a = eval(lhs, ctx, focus)?;
            let b = eval(rhs, ctx, focus)?;
            Ok(Value::Bool(compare(ctx, op, &a, &b)?))
        }
    }
}

fn compare(ctx: &XPathContext<'_, '_>, op: BinOp, a: &Value, b: &Value) -> Result<bool, Error> {
    // Node-sets compare existentially over their string values.
    if let Value::Nodes(nodes) = a {
        if let Value::Bool(_) = b {
            return compare_atoms(op, &Value::Bool(!nodes.is_empty()), b, ctx);
        }
        for n in nodes {
            if compare(ctx, op, &Value::Str(string_value(ctx, *n)?), b)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    if let Value::Nodes(nodes) = b {
        if let Value::Bool(_) = a {
            return compare_atoms(op, a, &Value::Bool(!nodes.is_empty()), ctx);
        }
        for n in nodes {
            if compare(ctx, op, a, &Value::Str(string_value(ctx, *n)?))? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    compare_atoms(op, a, b, ctx)
}

fn compare_atoms(op: BinOp, a: &Value, b: &Value, ctx: &XPathContext<'_, '_>) -> Result<bool, Error> {
    match op {
        BinOp::Eq | BinOp::NotEq => {
            let eq = match (a, b) {
                (Value::Bool(_), _) | (_, Value::Bool(_)) => boolean(a) == boolean(b),
                (Value::Num(_), _) | (_, Value::Num(_)) => number(ctx, a)? == number(ctx, b)?,
                _ => string(ctx, a)? == string(ctx, b)?,
            };
            Ok(if matches!(op, BinOp::Eq) { eq } else { !eq })
        }
        _ => {
            let (x, y) = (number(ctx, a)?, number(ctx, b)?);
            Ok(match op {
                BinOp::Lt => x < y,
                BinOp::Le => x <= y,
                BinOp::Gt => x > y,
                _ => x >= y,
            })
        }
    }
}

fn apply_steps(ctx: &XPathContext<'_, '_>, start: Vec<XNode>, steps: &[Step]) -> Result<Vec<XNode>, Error> {
    let mut current = start;
    for step in steps {
        let mut next = Vec::new();
        for node in &current {
            let mut candidates: Vec<XNode> = axis_nodes(ctx, *node, step.axis)?
                .into_iter()
                .filter(|n| node_test(ctx, *n, step))
                .collect();
            for pred in &step.predicates {
                candidates = apply_predicate(ctx, candidates, pred)?;
            }
            next.extend(candidates);
        }
        current = document_order(next);
    }
    Ok(current)
}

fn apply_predicate(ctx: &XPathContext<'_, '_>, nodes: Vec<XNode>, pred: &Expr) -> Result<Vec<XNode>, Error> {
    let size = nodes.len();
    let mut out = Vec::with_capacity(size);
    for (i, node) in nodes.into_iter().enumerate() {
        let focus = Focus {
            node,
            position: i + 1,
            size,
        };
        let keep = match eval(pred, ctx, &focus)? {
            Value::Num(n) => n == (i + 1) as f64,
            v => boolean(&v),
        };
        if keep {
            out.push(node);
        }
    }
    Ok(out)
}

/// Nodes along `axis` in axis order; reverse axes come nearest first so
/// positional predicates count proximity.
fn axis_nodes(ctx: &XPathContext<'_, '_>, node: XNode, axis: Axis) -> Result<Vec<XNode>, Error> {
    let tree = |n: Node<'_, '_>| XNode::Node(n.id());
    let owner = ctx.node(node.tree_id())?;
    let out = match node {
        XNode::Attr(..) => match axis {
            Axis::SelfAxis | Axis::DescendantOrSelf => vec![node],
            Axis::Parent => vec![tree(owner)],
            Axis::Ancestor => owner.ancestors().map(tree).collect(),
            Axis::AncestorOrSelf => std::iter::once(node)
                .chain(owner.ancestors().map(tree))
                .collect(),
            _ => Vec::new(),
        },
        XNode::Node(_) => match axis {
            Axis::Child => owner.children().map(tree).collect(),
            Axis::Descendant => owner.descendants().skip(1).map(tree).collect(),
            Axis::DescendantOrSelf => owner.descendants().map(tree).collect(),
            Axis::Parent => owner.parent().map(tree).into_iter().collect(),
            Axis::Ancestor => owner.ancestors().skip(1).map(tree).collect(),
            Axis::AncestorOrSelf => owner.ancestors().map(tree).collect(),
            Axis::SelfAxis => vec![node],
            Axis::Attribute => (0..owner.attributes().len())
                .map(|i| XNode::Attr(owner.id(), i))
                .collect(),
            Axis::FollowingSibling => owner.next_siblings().skip(1).map(tree).collect(),
            Axis::PrecedingSibling => owner.prev_siblings().skip(1).map(tree).collect(),
        },
    };
    Ok(out)
}

fn node_test(ctx: &XPathContext<'_, '_>, node: XNode, step: &Step) -> bool {
    let Ok(tree) = ctx.node(node.tree_id()) else {
        return false;
    };
    let principal_attr = step.axis == Axis::Attribute;
    match (&step.test, node) {
        (NodeTest::Node, _) => true,
        (NodeTest::Text, XNode::Node(_)) => tree.is_text(),
        (NodeTest::Comment, XNode::Node(_)) => tree.is_comment(),
        (NodeTest::Pi, XNode::Node(_)) => tree.is_pi(),
        (NodeTest::Any, XNode::Node(_)) => !principal_attr && tree.is_element(),
        (NodeTest::Any, XNode::Attr(..)) => principal_attr,
        (NodeTest::PrefixAny(prefix), _) => match ctx.namespaces.get(prefix) {
            Some(uri) => expanded_name(ctx, node, principal_attr)
                .is_some_and(|(ns, _)| ns == Some(uri.as_str())),
            None => false,
        },
        (NodeTest::Name(prefix, local), _) => {
            let want_ns = match prefix {
                Some(p) => match ctx.namespaces.get(p) {
                    Some(uri) => Some(uri.as_str()),
                    None => return false,
                },
                None => None,
            };
            expanded_name(ctx, node, principal_attr)
                .is_some_and(|(ns, name)| ns == want_ns && name == *local)
        }
        _ => false,
    }
}

/// `(namespace, local name)` when `node` is of the principal node type.
fn expanded_name<'a>(
    ctx: &XPathContext<'a, '_>,
    node: XNode,
    principal_attr: bool,
) -> Option<(Option<&'a str>, &'a str)> {
    match node {
        XNode::Node(id) if !principal_attr => {
            let n = ctx.doc.get_node(id)?;
            n.is_element()
                .then(|| (n.tag_name().namespace(), n.tag_name().name()))
        }
        XNode::Attr(id, i) if principal_attr => {
            let a = ctx.doc.get_node(id)?.attributes().nth(i)?;
            Some((a.namespace(), a.name()))
        }
        _ => None,
    }
}

fn document_order(mut nodes: Vec<XNode>) -> Vec<XNode> {
    nodes.sort_by_key(|n| n.order_key());
    nodes.dedup();
    nodes
}

fn call(name: &str, args: &[Expr], ctx: &XPathContext<'_, '_>, focus: &Focus) -> Result<Value, Error> {
    let arg = |i: usize| -> Result<Value, Error> {
        args.get(i)
            .ok_or_else(|| Error::Transform(format!("XPath: {name}() missing argument {}", i + 1)))
            .and_then(|e| eval(e, ctx, focus))
    };
    let nodes_arg = |i: usize| -> Result<Vec<XNode>, Error> {
        if args.is_empty() {
            return Ok(vec![focus.node]);
        }
        match arg(i)? {
            Value::Nodes(n) => Ok(n),
            other => Err(Error::Transform(format!(
                "XPath: {name}() expects a node-set, got {other:?}"
            ))),
        }
    };
    let string_arg = |i: usize| -> Result<String, Error> {
        if args.is_empty() {
            return string_value(ctx, focus.node);
        }
        string(ctx, &arg(i)?)
    };
    Ok(match name {
        "not" => Value::Bool(!boolean(&arg(0)?)),
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "boolean" => Value::Bool(boolean(&arg(0)?)),
        "position" => Value::Num(focus.position as f64),
        "last" => Value::Num(focus.size as f64),
        "count" => Value::Num(nodes_arg(0)?.len() as f64),
        "here" => Value::Nodes(ctx.here.map(XNode::Node).into_iter().collect()),
        "id" => {
            let wanted = match arg(0)? {
                Value::Nodes(nodes) => nodes
                    .iter()
                    .map(|n| string_value(ctx, *n))
                    .collect::<Result<Vec<_>, _>>()?
                    .join(" "),
                other => string(ctx, &other)?,
            };
            let found = wanted
                .split_whitespace()
                .filter_map(|id| ctx.ids.and_then(|m| m.get(id)))
                .map(|id| XNode::Node(*id))
                .collect();
            Value::Nodes(document_order(found))
        }
        "string" => Value::Str(string_arg(0)?),
        "number" => Value::Num(if args.is_empty() {
            number(ctx, &Value::Str(string_value(ctx, focus.node)?))?
        } else {
            number(ctx, &arg(0)?)?
        }),
        "string-length" => Value::Num(string_arg(0)?.chars().count() as f64),
        "normalize-space" => Value::Str(
            string_arg(0)?
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        ),
        "concat" => {
            let mut out = String::new();
            for i in 0..args.len() {
                out.push_str(&string(ctx, &arg(i)?)?);
            }
            Value::Str(out)
        }
        "contains" => Value::Bool(string(ctx, &arg(0)?)?.contains(&string(ctx, &arg(1)?)?)),
        "starts-with" => {
            Value::Bool(string(ctx, &arg(0)?)?.starts_with(&string(ctx, &arg(1)?)?))
        }
        "local-name" | "name" | "namespace-uri" => {
            let Some(first) = nodes_arg(0)?.first().copied() else {
                return Ok(Value::Str(String::new()));
            };
            Value::Str(node_name(ctx, first, name)?)
        }
        _ => {
            return Err(Error::Transform(format!(
                "XPath: unsupported function {name}()"
            )))
        }
    })
}

fn node_name(ctx: &XPathContext<'_, '_>, node: XNode, which: &str) -> Result<String, Error> {
    match node {
        XNode::Node(id) => {
            let n = ctx.node(id)?;
            if !n.is_element() {
                return Ok(String::new());
            }
            Ok(match which {
                "local-name" => n.tag_name().name().to_owned(),
                "namespace-uri" => n.tag_name().namespace().unwrap_or("").to_owned(),
                _ => qualified_name(n).to_owned(),
            })
        }
        XNode::Attr(id, i) => {
            let owner = ctx.node(id)?;
            let a = ctx.attr(id, i)?;
            Ok(match which {
                "local-name" => a.name().to_owned(),
                "namespace-uri" => a.namespace().unwrap_or("").to_owned(),
                _ => attribute_qname(owner, &a),
            })
        }
    }
}

/// XPath `boolean()` conversion.
pub fn boolean(v: &Value) -> bool {
    match v {
        Value::Nodes(n) => !n.is_empty(),
        Value::Bool(b) => *b,
        Value::Num(n) => *n != 0.0 && !n.is_nan(),
        Value::Str(s) => !s.is_empty(),
    }
}

fn string(ctx: &XPathContext<'_, '_>, v: &Value) -> Result<String, Error> {
    Ok(match v {
        Value::Nodes(n) => match n.first() {
            Some(first) => string_value(ctx, *first)?,
            None => String::new(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Num(n) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
        Value::Num(n) => n.to_string(),
        Value::Str(s) => s.clone(),
    })
}

fn number(ctx: &XPathContext<'_, '_>, v: &Value) -> Result<f64, Error> {
    Ok(match v {
        Value::Num(n) => *n,
        Value::Bool(b) => f64::from(u8::from(*b)),
        other => string(ctx, other)?.trim().parse().unwrap_or(f64::NAN),
    })
}

/// The XPath string-value of a node.
pub fn string_value(ctx: &XPathContext<'_, '_>, node: XNode) -> Result<String, Error> {
    match node {
        XNode::Attr(id, i) => Ok(ctx.attr(id, i)?.value().to_owned()),
        XNode::Node(id) => {
            let n = ctx.node(id)?;
            Ok(if n.is_element() || n.is_root() {
                n.descendants()
                    .filter(|d| d.is_text())
                    .filter_map(|d| d.text())
                    .collect()
            } else if let Some(pi) = n.pi() {
                pi.value.unwrap_or("").to_owned()
            } else {
                n.text().unwrap_or("").to_owned()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";

    const DOC: &str = r#"<doc xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
  <item Id="a" kind="x">one</item>
  <item Id="b" kind="y">two<!--note--></item>
  <ds:Signature><ds:SignedInfo/></ds:Signature>
</doc>"#;

    fn elements<'a>(doc: &'a Document<'a>, nodes: &[XNode]) -> Vec<&'a str> {
        nodes
            .iter()
            .filter_map(|n| match n {
                XNode::Node(id) => doc.get_node(*id),
                _ => None,
            })
            .filter(|n| n.is_element())
            .map(|n| n.tag_name().name())
            .collect()
    }

    #[test]
    fn test_descendant_selection() {
        let doc = Document::parse(DOC).unwrap();
        let ctx = XPathContext::new(&doc);
        let root = XNode::Node(doc.root().id());
        let nodes = XPath::parse("//item").unwrap().select(&ctx, root).unwrap();
        assert_eq!(elements(&doc, &nodes), vec!["item", "item"]);
    }

    #[test]
    fn test_attribute_predicate() {
        let doc = Document::parse(DOC).unwrap();
        let ctx = XPathContext::new(&doc);
        let root = XNode::Node(doc.root().id());
        let xp = XPath::parse("/doc/item[@kind='y']").unwrap();
        let nodes = xp.select(&ctx, root).unwrap();
        assert_eq!(nodes.len(), 1);
        let text = string_value(&ctx, nodes[0]).unwrap();
        assert_eq!(text, "two");
        let second = XPath::parse("/doc/item[2]/@Id").unwrap().select(&ctx, root).unwrap();
        assert_eq!(string_value(&ctx, second[0]).unwrap(), "b");
    }

    #[test]
    fn test_enveloped_idiom() {
        let doc = Document::parse(DOC).unwrap();
        let ctx = XPathContext::new(&doc).with_namespace("dsig", DSIG);
        let xp = XPath::parse("not(ancestor-or-self::dsig:Signature)").unwrap();
        let signed_info = doc
            .descendants()
            .find(|n| n.tag_name().name() == "SignedInfo")
            .unwrap();
        assert!(!xp.matches(&ctx, XNode::Node(signed_info.id())).unwrap());
        let item = doc.descendants().find(|n| n.has_tag_name("item")).unwrap();
        assert!(xp.matches(&ctx, XNode::Node(item.id())).unwrap());
    }

    #[test]
    fn test_unbound_prefix_matches_nothing() {
        let doc = Document::parse(DOC).unwrap();
        let ctx = XPathContext::new(&doc);
        let xp = XPath::parse("//ds:Signature").unwrap();
        let nodes = xp.select(&ctx, XNode::Node(doc.root().id())).unwrap();
        assert!(nodes.is_empty());
    }

    #[test]
    fn test_id_and_here_and_union() {
        let doc = Document::parse(DOC).unwrap();
        let ids = crate::document::build_id_map(&doc, &[]);
        let sig = doc.descendants().find(|n| n.has_tag_name((DSIG, "Signature"))).unwrap();
        let ctx = XPathContext::new(&doc)
            .with_ids(&ids)
            .with_here(sig.id())
            .with_namespace("ds", DSIG);
        let root = XNode::Node(doc.root().id());
        let nodes = XPath::parse("id('b') | id('a')").unwrap().select(&ctx, root).unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes[0].order_key() < nodes[1].order_key());
        let here = XPath::parse("here()/ancestor::doc").unwrap().select(&ctx, root).unwrap();
        assert_eq!(elements(&doc, &here), vec!["doc"]);
    }

    #[test]
    fn test_node_type_tests_and_functions() {
        let doc = Document::parse(DOC).unwrap();
        let ctx = XPathContext::new(&doc);
        let root = XNode::Node(doc.root().id());
        let comments = XPath::parse("//comment()").unwrap().select(&ctx, root).unwrap();
        assert_eq!(comments.len(), 1);
        let count = XPath::parse("count(//item) = 2 and string-length('abc') = 3")
            .unwrap()
            .matches(&ctx, root)
            .unwrap();
        assert!(count);
        let name = XPath::parse("name(//*[local-name()='Signature'])")
            .unwrap()
            .evaluate(&ctx, root)
            .unwrap();
        assert_eq!(name, Value::Str("ds:Signature".into()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(XPath::parse("//item[").is_err());
        assert!(XPath::parse("'open").is_err());
        assert!(XPath::parse("following::x").is_err());
        let doc = Document::parse(DOC).unwrap();
        let ctx = XPathContext::new(&doc);
        let err = XPath::parse("frobnicate()")
            .unwrap()
            .evaluate(&ctx, XNode::Node(doc.root().id()));
        assert!(err.is_err());
    }
}
