//! Directed-graph description grammar.
//!
//! The server encodes every snapshot as DOT text. This module turns that text
//! into a flat list of declared nodes and edges with their attributes, without
//! interpreting any attribute. Interpretation (ids, rankings, filtering) lives
//! in [`crate::parser`].
//!
//! Supported grammar, in the usual DOT shape:
//!
//! ```text
//! graph     : [strict] (graph | digraph) [ID] '{' stmt_list '}'
//! stmt      : node_stmt | edge_stmt | attr_stmt | ID '=' ID | subgraph
//! attr_stmt : (graph | node | edge) attr_list
//! edge_stmt : (node_id | subgraph) edgeRHS [attr_list]
//! subgraph  : [subgraph [ID]] '{' stmt_list '}'
//! ```
//!
//! Subgraphs are flattened: their nodes and edges land in the top-level lists,
//! and default attributes set inside a subgraph stop applying when it closes.

use crate::error::{ParseError, Result};
use std::collections::{BTreeMap, HashMap};

/// Attribute map of a node or edge.
pub type Attributes = BTreeMap<String, String>;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// A node declared in a graph description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotNode {
    /// The node identifier exactly as written (quotes removed).
    pub id: String,
    pub attributes: Attributes,
}

impl DotNode {
    /// Looks up an attribute value.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// An edge declared in a graph description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotEdge {
    pub from: String,
    pub to: String,
    pub attributes: Attributes,
}

impl DotEdge {
    /// Looks up an attribute value.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// A parsed graph description.
///
/// Nodes keep the order of their first appearance, edges keep textual order.
#[derive(Debug, Clone, Default)]
pub struct DotGraph {
    strict: bool,
    directed: bool,
    name: Option<String>,
    attributes: Attributes,
    nodes: Vec<DotNode>,
    node_index: HashMap<String, usize>,
    edges: Vec<DotEdge>,
}

impl DotGraph {
    /// Parses a graph description.
    ///
    /// Blank input yields an empty directed graph rather than an error.
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = Lexer::new(text).tokenize()?;
        if tokens.is_empty() {
            return Ok(Self {
                directed: true,
                ..Self::default()
            });
        }
        GrammarParser::new(tokens).parse_graph()
    }

    /// Whether the description was declared `strict`.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Whether the description was a `digraph`.
    pub fn is_directed(&self) -> bool {
        self.directed
    }

    /// The graph identifier, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Graph-level attributes (`graph [..]` and `key = value` statements).
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// All nodes in first-appearance order.
    pub fn nodes(&self) -> &[DotNode] {
        &self.nodes
    }

    /// All edges in textual order.
    pub fn edges(&self) -> &[DotEdge] {
        &self.edges
    }

    /// Finds a node by identifier.
    pub fn node(&self, id: &str) -> Option<&DotNode> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    /// Declares a node if unseen, applying `defaults`, and returns its slot.
    fn ensure_node(&mut self, id: &str, defaults: &Attributes) -> usize {
        if let Some(&i) = self.node_index.get(id) {
            return i;
        }
        let index = self.nodes.len();
        self.nodes.push(DotNode {
            id: id.to_string(),
            attributes: defaults.clone(),
        });
        self.node_index.insert(id.to_string(), index);
        index
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lexer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Unquoted identifier or numeral. Keywords are recognized from these.
    Bare(String),
    /// Double-quoted string.
    Quoted(String),
    /// HTML-style `<...>` identifier.
    Html(String),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Equals,
    Semi,
    Comma,
    Colon,
    Plus,
    /// `->` or `--`.
    EdgeOp,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Bare(s) => s.clone(),
            Token::Quoted(s) => format!("\"{}\"", s),
            Token::Html(s) => format!("<{}>", s),
            Token::LBrace => "'{'".into(),
            Token::RBrace => "'}'".into(),
            Token::LBracket => "'['".into(),
            Token::RBracket => "']'".into(),
            Token::Equals => "'='".into(),
            Token::Semi => "';'".into(),
            Token::Comma => "','".into(),
            Token::Colon => "':'".into(),
            Token::Plus => "'+'".into(),
            Token::EdgeOp => "edge operator".into(),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Bare(s) if s.eq_ignore_ascii_case(keyword))
    }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn tokenize(mut self) -> Result<Vec<(Token, u32)>> {
        let mut tokens = Vec::new();

        while let Some(&c) = self.chars.peek() {
            let line = self.line;
            match c {
                c if c.is_whitespace() => {
                    self.bump();
                }
                '#' => self.skip_line(),
                '/' => {
                    self.bump();
                    match self.chars.peek() {
                        Some('/') => self.skip_line(),
                        Some('*') => {
                            self.bump();
                            self.skip_block_comment(line)?;
                        }
                        _ => return Err(ParseError::UnexpectedChar { found: '/', line }),
                    }
                }
                '{' | '}' | '[' | ']' | '=' | ';' | ',' | ':' | '+' => {
                    self.bump();
                    let token = match c {
                        '{' => Token::LBrace,
                        '}' => Token::RBrace,
                        '[' => Token::LBracket,
                        ']' => Token::RBracket,
                        '=' => Token::Equals,
                        ';' => Token::Semi,
                        ',' => Token::Comma,
                        ':' => Token::Colon,
                        _ => Token::Plus,
                    };
                    tokens.push((token, line));
                }
                '"' => {
                    self.bump();
                    tokens.push((Token::Quoted(self.read_quoted(line)?), line));
                }
                '<' => {
                    self.bump();
                    tokens.push((Token::Html(self.read_html(line)?), line));
                }
                '-' => {
                    self.bump();
                    match self.chars.peek() {
                        Some('>') | Some('-') => {
                            self.bump();
                            tokens.push((Token::EdgeOp, line));
                        }
                        Some(d) if d.is_ascii_digit() || *d == '.' => {
                            let mut numeral = String::from("-");
                            numeral.push_str(&self.read_numeral());
                            tokens.push((Token::Bare(numeral), line));
                        }
                        _ => return Err(ParseError::UnexpectedChar { found: '-', line }),
                    }
                }
                c if c.is_ascii_digit() || c == '.' => {
                    tokens.push((Token::Bare(self.read_numeral()), line));
                }
                c if is_ident_start(c) => {
                    tokens.push((Token::Bare(self.read_ident()), line));
                }
                other => return Err(ParseError::UnexpectedChar { found: other, line }),
            }
        }

        Ok(tokens)
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self, start: u32) -> Result<()> {
        let mut prev = '\0';
        while let Some(c) = self.bump() {
            if prev == '*' && c == '/' {
                return Ok(());
            }
            prev = c;
        }
        Err(ParseError::Unterminated {
            what: "comment",
            line: start,
        })
    }

    fn read_quoted(&mut self, start: u32) -> Result<String> {
        let mut out = String::new();
        while let Some(c) = self.bump() {
            match c {
                '"' => return Ok(out),
                '\\' => match self.bump() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    // Line continuation
                    Some('\n') => {}
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => break,
                },
                other => out.push(other),
            }
        }
        Err(ParseError::Unterminated {
            what: "string",
            line: start,
        })
    }

    fn read_html(&mut self, start: u32) -> Result<String> {
        let mut out = String::new();
        let mut depth = 1usize;
        while let Some(c) = self.bump() {
            match c {
                '<' => depth += 1,
                '>' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(out);
                    }
                }
                _ => {}
            }
            out.push(c);
        }
        Err(ParseError::Unterminated {
            what: "html id",
            line: start,
        })
    }

    fn read_numeral(&mut self) -> String {
        let mut out = String::new();
        let mut seen_dot = false;
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                out.push(c);
            } else if c == '.' && !seen_dot {
                seen_dot = true;
                out.push(c);
            } else {
                break;
            }
            self.bump();
        }
        out
    }

    fn read_ident(&mut self) -> String {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if is_ident_start(c) || c.is_ascii_digit() {
                out.push(c);
                self.bump();
            } else {
                break;
            }
        }
        out
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || !c.is_ascii()
}

// ─────────────────────────────────────────────────────────────────────────────
// Grammar
// ─────────────────────────────────────────────────────────────────────────────

/// Default attributes in effect for one (sub)graph scope.
#[derive(Clone, Default)]
struct Scope {
    node_defaults: Attributes,
    edge_defaults: Attributes,
}

/// Deepest subgraph nesting accepted before parsing gives up.
const MAX_NESTING: usize = 128;

struct GrammarParser {
    tokens: Vec<(Token, u32)>,
    pos: usize,
    /// Current subgraph nesting depth.
    depth: usize,
    graph: DotGraph,
}

impl GrammarParser {
    fn new(tokens: Vec<(Token, u32)>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            graph: DotGraph::default(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, l)| *l)
            .unwrap_or(1)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &'static str) -> Result<()> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(what))
        }
    }

    fn error(&self, expected: &'static str) -> ParseError {
        let found = self
            .peek()
            .map(Token::describe)
            .unwrap_or_else(|| "end of input".to_string());
        ParseError::unexpected(expected, found, self.line())
    }

    fn parse_graph(mut self) -> Result<DotGraph> {
        if self.peek().is_some_and(|t| t.is_keyword("strict")) {
            self.pos += 1;
            self.graph.strict = true;
        }

        match self.next() {
            Some(t) if t.is_keyword("digraph") => self.graph.directed = true,
            Some(t) if t.is_keyword("graph") => self.graph.directed = false,
            _ => {
                self.pos = self.pos.saturating_sub(1);
                return Err(self.error("'graph' or 'digraph'"));
            }
        }

        if !matches!(self.peek(), Some(Token::LBrace)) {
            self.graph.name = Some(self.parse_id()?);
        }

        self.expect(Token::LBrace, "'{'")?;
        let mut scope = Scope::default();
        self.parse_stmt_list(&mut scope)?;
        self.expect(Token::RBrace, "'}'")?;

        // Anything after the first graph is ignored.
        Ok(self.graph)
    }

    /// Parses statements until the closing brace, returning every node id
    /// referenced in this block.
    fn parse_stmt_list(&mut self, scope: &mut Scope) -> Result<Vec<String>> {
        let mut members = Vec::new();
        loop {
            match self.peek() {
                None | Some(Token::RBrace) => return Ok(members),
                Some(Token::Semi) => {
                    self.pos += 1;
                }
                _ => self.parse_stmt(scope, &mut members)?,
            }
        }
    }

    fn parse_stmt(&mut self, scope: &mut Scope, members: &mut Vec<String>) -> Result<()> {
        let token = self.peek().cloned();

        // attr_stmt
        if let Some(t) = &token {
            let target = ["graph", "node", "edge"]
                .into_iter()
                .find(|k| t.is_keyword(k));
            if let Some(target) = target {
                if matches!(self.tokens.get(self.pos + 1), Some((Token::LBracket, _))) {
                    self.pos += 1;
                    let attrs = self.parse_attr_lists()?;
                    let slot = match target {
                        "node" => &mut scope.node_defaults,
                        "edge" => &mut scope.edge_defaults,
                        _ => &mut self.graph.attributes,
                    };
                    slot.extend(attrs);
                    return Ok(());
                }
            }
        }

        // ID '=' ID
        if matches!(self.tokens.get(self.pos + 1), Some((Token::Equals, _)))
            && !matches!(token, Some(Token::LBrace))
        {
            let key = self.parse_id()?;
            self.expect(Token::Equals, "'='")?;
            let value = self.parse_id()?;
            self.graph.attributes.insert(key, value);
            return Ok(());
        }

        let head = self.parse_operand(scope)?;
        members.extend(head.iter().cloned());

        if matches!(self.peek(), Some(Token::EdgeOp)) {
            let mut operands = vec![head];
            while self.eat(&Token::EdgeOp) {
                let operand = self.parse_operand(scope)?;
                members.extend(operand.iter().cloned());
                operands.push(operand);
            }

            let explicit = if matches!(self.peek(), Some(Token::LBracket)) {
                self.parse_attr_lists()?
            } else {
                Attributes::new()
            };

            for pair in operands.windows(2) {
                for from in &pair[0] {
                    for to in &pair[1] {
                        let mut attributes = scope.edge_defaults.clone();
                        attributes.extend(explicit.clone());
                        self.graph.edges.push(DotEdge {
                            from: from.clone(),
                            to: to.clone(),
                            attributes,
                        });
                    }
                }
            }
            return Ok(());
        }

        // Plain node statement: attributes apply to a single node only.
        if matches!(self.peek(), Some(Token::LBracket)) {
            let attrs = self.parse_attr_lists()?;
            if let [id] = head.as_slice() {
                let index = self.graph.ensure_node(id, &scope.node_defaults);
                self.graph.nodes[index].attributes.extend(attrs);
            }
        }
        Ok(())
    }

    /// Parses a node id or subgraph, returning the node ids it stands for.
    fn parse_operand(&mut self, scope: &Scope) -> Result<Vec<String>> {
        let is_subgraph = match self.peek() {
            Some(Token::LBrace) => true,
            Some(t) => t.is_keyword("subgraph"),
            None => false,
        };

        if is_subgraph {
            if self.peek().is_some_and(|t| t.is_keyword("subgraph")) {
                self.pos += 1;
                if !matches!(self.peek(), Some(Token::LBrace)) {
                    self.parse_id()?;
                }
            }
            if self.depth >= MAX_NESTING {
                return Err(ParseError::TooDeep {
                    limit: MAX_NESTING,
                    line: self.line(),
                });
            }
            self.expect(Token::LBrace, "'{'")?;
            self.depth += 1;
            let mut inner = scope.clone();
            let members = self.parse_stmt_list(&mut inner)?;
            self.expect(Token::RBrace, "'}'")?;
            self.depth -= 1;
            return Ok(members);
        }

        let id = self.parse_id()?;
        // Ports (`a:port:compass`) do not affect identity.
        while self.eat(&Token::Colon) {
            self.parse_id()?;
        }
        self.graph.ensure_node(&id, &scope.node_defaults);
        Ok(vec![id])
    }

    fn parse_attr_lists(&mut self) -> Result<Attributes> {
        let mut attrs = Attributes::new();
        while self.eat(&Token::LBracket) {
            loop {
                match self.peek() {
                    Some(Token::RBracket) => {
                        self.pos += 1;
                        break;
                    }
                    Some(Token::Comma) | Some(Token::Semi) => {
                        self.pos += 1;
                    }
                    _ => {
                        let key = self.parse_id()?;
                        let value = if self.eat(&Token::Equals) {
                            self.parse_id()?
                        } else {
                            "true".to_string()
                        };
                        attrs.insert(key, value);
                    }
                }
            }
        }
        Ok(attrs)
    }

    fn parse_id(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Bare(s)) | Some(Token::Html(s)) => Ok(s),
            Some(Token::Quoted(mut s)) => {
                while matches!(self.peek(), Some(Token::Plus)) {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Quoted(more)) => s.push_str(&more),
                        _ => {
                            self.pos = self.pos.saturating_sub(1);
                            return Err(self.error("string after '+'"));
                        }
                    }
                }
                Ok(s)
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("identifier"))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
