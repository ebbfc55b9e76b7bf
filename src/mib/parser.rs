//! LL parser over the token stream.
//!
//! Each macro that produces a node emits a [`RawNode`] carrying its
//! parent's name as a string; linking into the arena tree happens later
//! in [`super::repository`].

use tracing::warn;

use crate::ber::{
    TAG_COUNTER32, TAG_COUNTER64, TAG_INTEGER, TAG_IP_ADDRESS, TAG_OCTET_STRING, TAG_OID,
    TAG_OPAQUE, TAG_SEQUENCE, TAG_TIME_TICKS, TAG_UNSIGNED32,
};
use crate::error::{Error, Result};

use super::node::{MibAccess, MibMacro};
use super::types::Restriction;

#[derive(Debug, Clone)]
pub struct RawNode {
    pub label: String,
    pub parent_name: String,
    pub sub_id: u32,
    pub module: String,
    pub type_name: Option<String>,
    pub syntax_tag: u8,
    pub access: MibAccess,
    pub status: super::node::MibStatus,
    pub macro_kind: MibMacro,
    pub index_clause: Option<String>,
    pub implied: bool,
    pub augments: bool,
    pub source_file: String,
    pub desc_offset: Option<(String, u64)>,
}

#[derive(Debug, Clone)]
pub struct RawType {
    pub name: String,
    pub module: String,
    pub base_syntax: u8,
    pub display_hint: Option<String>,
    pub restriction: Restriction,
    pub status: super::node::MibStatus,
}

#[derive(Debug, Default)]
pub struct ParsedModule {
    pub name: String,
    pub nodes: Vec<RawNode>,
    pub types: Vec<RawType>,
}

use super::token::{Lexer, Spanned, Token};

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Spanned,
    module: String,
    file: String,
    /// Type assignments (TEXTUAL-CONVENTION, plain aliases, and anonymous
    /// types synthesized from an OBJECT-TYPE's inline SYNTAX restriction)
    /// collected as they're parsed and drained into `ParsedModule::types`
    /// at each top-level boundary.
    pending_types: Vec<RawType>,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, file: &str) -> Result<Self> {
        let mut lexer = Lexer::new(src, file);
        let lookahead = lexer.next_token()?;
        Ok(Self {
            lexer,
            lookahead,
            module: String::new(),
            file: file.to_string(),
            pending_types: Vec::new(),
        })
    }

    fn bump(&mut self) -> Result<Token> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.lookahead, next).token)
    }

    fn peek(&self) -> &Token {
        &self.lookahead.token
    }

    fn line(&self) -> u32 {
        self.lookahead.line
    }

    fn expect(&mut self, tok: &Token) -> Result<()> {
        if self.peek() == tok {
            self.bump()?;
            Ok(())
        } else {
            Err(self.fatal(&format!("expected {tok:?}, found {:?}", self.peek())))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.bump()? {
            Token::Ident(s) => Ok(s),
            other => Err(self.fatal(&format!("expected identifier, found {other:?}"))),
        }
    }

    fn fatal(&self, msg: &str) -> Error {
        Error::MibSyntax {
            file: self.file.clone(),
            line: self.line(),
            message: msg.to_string(),
        }
    }

    /// Parse a whole module: `<name> DEFINITIONS ::= BEGIN ... END`.
    pub fn parse_module(&mut self) -> Result<ParsedModule> {
        let name = self.ident()?;
        self.module = name.clone();
        self.expect(&Token::Ident("DEFINITIONS".to_string()))?;
        self.expect(&Token::Assign)?;
        self.expect(&Token::Ident("BEGIN".to_string()))?;

        if self.peek() == &Token::Ident("IMPORTS".to_string()) {
            self.skip_imports()?;
        }

        let mut out = ParsedModule {
            name: name.clone(),
            ..Default::default()
        };

        loop {
            match self.peek().clone() {
                Token::Ident(ref kw) if kw == "END" => {
                    self.bump()?;
                    break;
                }
                Token::Eof => return Err(self.fatal("unterminated module: missing END")),
                Token::Ident(_) => match self.parse_assignment() {
                    Ok(Some(node)) => out.nodes.push(node),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(module = %name, error = %e, "skipping malformed MIB assignment");
                        self.skip_to_boundary()?;
                    }
                },
                other => return Err(self.fatal(&format!("unexpected token {other:?} at top level"))),
            }
            out.types.append(&mut self.pending_types);
        }
        Ok(out)
    }

    fn skip_imports(&mut self) -> Result<()> {
        self.bump()?;
        while self.peek() != &Token::Semicolon {
            if self.peek() == &Token::Eof {
                return Err(self.fatal("unterminated IMPORTS clause"));
            }
            self.bump()?;
        }
        self.bump()?;
        Ok(())
    }

    /// Skip tokens until the next plausible macro boundary: a `::=` that
    /// was not immediately consumed, approximated here by seeking the next
    /// top-level identifier following a brace-balanced region.
    fn skip_to_boundary(&mut self) -> Result<()> {
        let mut depth: i32 = 0;
        loop {
            match self.peek().clone() {
                Token::Eof => return Err(self.fatal("unterminated module while recovering from error")),
                Token::LBrace => {
                    depth += 1;
                    self.bump()?;
                }
                Token::RBrace => {
                    depth -= 1;
                    self.bump()?;
                    if depth <= 0 {
                        return Ok(());
                    }
                }
                Token::Semicolon if depth <= 0 => {
                    self.bump()?;
                    return Ok(());
                }
                _ => {
                    self.bump()?;
                }
            }
        }
    }

    /// `<name> ::= ...` dispatch: OBJECT-TYPE, OBJECT IDENTIFIER, textual
    /// convention / plain type assignment, MODULE-IDENTITY,
    /// NOTIFICATION-TYPE / TRAP-TYPE.
    fn parse_assignment(&mut self) -> Result<Option<RawNode>> {
        let label = self.ident()?;
        if self.peek() != &Token::Assign {
            // Not a `::=` assignment (e.g. a macro definition we don't
            // interpret); treat as a parse error for recovery purposes.
            return Err(self.fatal(&format!("expected '::=' after '{label}'")));
        }
        self.bump()?;

        match self.peek().clone() {
            Token::LBrace => {
                // `label OBJECT IDENTIFIER ::= { parent sub }` shorthand,
                // already past the type keywords (handled below too).
                self.parse_oid_value(label)
            }
            Token::Ident(ref kw) if kw == "OBJECT-TYPE" => {
                self.bump()?;
                self.parse_object_type(label)
            }
            Token::Ident(ref kw) if kw == "OBJECT" => {
                self.bump()?;
                self.expect(&Token::Ident("IDENTIFIER".to_string()))?;
                self.parse_oid_value_after_type(label)
            }
            Token::Ident(ref kw) if kw == "MODULE-IDENTITY" => {
                self.bump()?;
                self.parse_module_identity(label)
            }
            Token::Ident(ref kw) if kw == "OBJECT-IDENTITY" => {
                self.bump()?;
                self.parse_object_identity(label)
            }
            Token::Ident(ref kw) if kw == "NOTIFICATION-TYPE" || kw == "TRAP-TYPE" => {
                let is_trap1 = kw == "TRAP-TYPE";
                self.bump()?;
                self.parse_notification(label, is_trap1)
            }
            Token::Ident(ref kw) if kw == "TEXTUAL-CONVENTION" => {
                self.bump()?;
                self.parse_textual_convention(label)?;
                Ok(None)
            }
            _ => {
                // Plain type assignment: `Foo ::= INTEGER { ... }` etc.
                self.parse_plain_type_assignment(label)?;
                Ok(None)
            }
        }
    }

    fn parse_oid_value(&mut self, label: String) -> Result<Option<RawNode>> {
        self.expect(&Token::LBrace)?;
        let (parent_name, sub_id) = self.parse_name_and_subids()?;
        self.expect(&Token::RBrace)?;
        Ok(Some(RawNode {
            label,
            parent_name,
            sub_id,
            module: self.module.clone(),
            type_name: None,
            syntax_tag: 0,
            access: MibAccess::NotAccessible,
            status: super::node::MibStatus::Current,
            macro_kind: MibMacro::ValueAssignment,
            index_clause: None,
            implied: false,
            augments: false,
            source_file: self.file.clone(),
            desc_offset: None,
        }))
    }

    fn parse_oid_value_after_type(&mut self, label: String) -> Result<Option<RawNode>> {
        self.parse_oid_value(label)
    }

    /// Parses `{ a b c(n) ... lastName(n) }`, returning the immediate
    /// parent name and this node's own sub-id.
    fn parse_name_and_subids(&mut self) -> Result<(String, u32)> {
        let mut components: Vec<(String, Option<u32>)> = Vec::new();
        loop {
            match self.peek().clone() {
                Token::RBrace => break,
                Token::Ident(name) => {
                    self.bump()?;
                    let n = if self.peek() == &Token::LParen {
                        self.bump()?;
                        let v = self.number()?;
                        self.expect(&Token::RParen)?;
                        Some(v as u32)
                    } else {
                        None
                    };
                    components.push((name, n));
                }
                Token::Number(n) => {
                    self.bump()?;
                    components.push((n.to_string(), Some(n as u32)));
                }
                other => return Err(self.fatal(&format!("unexpected token {other:?} in OID value"))),
            }
        }
        if components.is_empty() {
            return Err(self.fatal("empty OID value"));
        }
        let (last_name, last_n) = components.last().unwrap().clone();
        let sub_id = last_n.ok_or_else(|| self.fatal("terminal OID component has no sub-id"))?;
        let parent_name = if components.len() >= 2 {
            components[components.len() - 2].0.clone()
        } else {
            last_name
        };
        Ok((parent_name, sub_id))
    }

    fn number(&mut self) -> Result<i64> {
        match self.bump()? {
            Token::Number(n) => Ok(n),
            other => Err(self.fatal(&format!("expected number, found {other:?}"))),
        }
    }

    fn parse_object_type(&mut self, label: String) -> Result<Option<RawNode>> {
        let mut syntax_tag = TAG_INTEGER;
        let mut type_name = None;
        let mut inline_restriction = Restriction::None;
        let mut access = MibAccess::NotAccessible;
        let mut status = super::node::MibStatus::Current;
        let mut index_clause = None;
        let mut implied = false;
        let mut augments = false;
        let mut desc_offset = None;

        loop {
            match self.peek().clone() {
                Token::Ident(ref kw) if kw == "SYNTAX" => {
                    self.bump()?;
                    let (tag, name, restriction) = self.parse_syntax()?;
                    syntax_tag = tag;
                    type_name = name;
                    inline_restriction = restriction;
                }
                Token::Ident(ref kw) if kw == "ACCESS" || kw == "MAX-ACCESS" => {
                    self.bump()?;
                    access = self.parse_access()?;
                }
                Token::Ident(ref kw) if kw == "STATUS" => {
                    self.bump()?;
                    status = self.parse_status()?;
                }
                Token::Ident(ref kw) if kw == "DESCRIPTION" => {
                    self.bump()?;
                    desc_offset = self.skip_description()?;
                }
                Token::Ident(ref kw) if kw == "INDEX" => {
                    self.bump()?;
                    let (clause, imp) = self.parse_index_clause()?;
                    index_clause = Some(clause);
                    implied = imp;
                }
                Token::Ident(ref kw) if kw == "AUGMENTS" => {
                    self.bump()?;
                    self.expect(&Token::LBrace)?;
                    let entry = self.ident()?;
                    self.expect(&Token::RBrace)?;
                    index_clause = Some(entry);
                    augments = true;
                }
                Token::Ident(ref kw) if kw == "DEFVAL" => {
                    self.bump()?;
                    self.expect(&Token::LBrace)?;
                    self.skip_balanced_braces()?;
                }
                Token::Assign => break,
                Token::Eof => return Err(self.fatal("unterminated OBJECT-TYPE clause")),
                _ => {
                    self.bump()?;
                }
            }
        }
        self.expect(&Token::Assign)?;
        self.expect(&Token::LBrace)?;
        let (parent_name, sub_id) = self.parse_name_and_subids()?;
        self.expect(&Token::RBrace)?;

        // An inline SYNTAX restriction (e.g. `SYNTAX INTEGER { up(1), down(2) }`
        // with no separate TEXTUAL-CONVENTION) has nowhere else to live, so it
        // becomes an anonymous type keyed to this node alone.
        let type_name = if inline_restriction != Restriction::None {
            let synthetic = format!("{label}@{}", self.module);
            self.pending_types.push(RawType {
                name: synthetic.clone(),
                module: self.module.clone(),
                base_syntax: syntax_tag,
                display_hint: None,
                restriction: inline_restriction,
                status,
            });
            Some(synthetic)
        } else {
            type_name
        };

        Ok(Some(RawNode {
            label,
            parent_name,
            sub_id,
            module: self.module.clone(),
            type_name,
            syntax_tag,
            access,
            status,
            macro_kind: MibMacro::ObjectType,
            index_clause,
            implied,
            augments,
            source_file: self.file.clone(),
            desc_offset,
        }))
    }

    fn parse_module_identity(&mut self, label: String) -> Result<Option<RawNode>> {
        loop {
            match self.peek().clone() {
                Token::Assign => break,
                Token::Eof => return Err(self.fatal("unterminated MODULE-IDENTITY clause")),
                Token::Ident(ref kw) if kw == "DESCRIPTION" => {
                    self.bump()?;
                    self.skip_description()?;
                }
                _ => {
                    self.bump()?;
                }
            }
        }
        self.bump()?;
        self.expect(&Token::LBrace)?;
        let (parent_name, sub_id) = self.parse_name_and_subids()?;
        self.expect(&Token::RBrace)?;
        Ok(Some(RawNode {
            label,
            parent_name,
            sub_id,
            module: self.module.clone(),
            type_name: None,
            syntax_tag: TAG_OID,
            access: MibAccess::NotAccessible,
            status: super::node::MibStatus::Current,
            macro_kind: MibMacro::ModuleIdentity,
            index_clause: None,
            implied: false,
            augments: false,
            source_file: self.file.clone(),
            desc_offset: None,
        }))
    }

    fn parse_object_identity(&mut self, label: String) -> Result<Option<RawNode>> {
        loop {
            match self.peek().clone() {
                Token::Assign => break,
                Token::Eof => return Err(self.fatal("unterminated OBJECT-IDENTITY clause")),
                Token::Ident(ref kw) if kw == "DESCRIPTION" => {
                    self.bump()?;
                    self.skip_description()?;
                }
                _ => {
                    self.bump()?;
                }
            }
        }
        self.bump()?;
        self.expect(&Token::LBrace)?;
        let (parent_name, sub_id) = self.parse_name_and_subids()?;
        self.expect(&Token::RBrace)?;
        Ok(Some(RawNode {
            label,
            parent_name,
            sub_id,
            module: self.module.clone(),
            type_name: None,
            syntax_tag: TAG_OID,
            access: MibAccess::NotAccessible,
            status: super::node::MibStatus::Current,
            macro_kind: MibMacro::ObjectIdentity,
            index_clause: None,
            implied: false,
            augments: false,
            source_file: self.file.clone(),
            desc_offset: None,
        }))
    }

    fn parse_notification(&mut self, label: String, is_trap1: bool) -> Result<Option<RawNode>> {
        loop {
            match self.peek().clone() {
                Token::Assign => break,
                Token::Eof => return Err(self.fatal("unterminated notification clause")),
                Token::Ident(ref kw) if kw == "DESCRIPTION" => {
                    self.bump()?;
                    self.skip_description()?;
                }
                Token::Ident(ref kw) if kw == "OBJECTS" || kw == "VARIABLES" => {
                    self.bump()?;
                    self.expect(&Token::LBrace)?;
                    self.skip_balanced_braces_entered()?;
                }
                _ => {
                    self.bump()?;
                }
            }
        }
        self.bump()?;
        self.expect(&Token::LBrace)?;
        let (parent_name, sub_id) = self.parse_name_and_subids()?;
        self.expect(&Token::RBrace)?;
        Ok(Some(RawNode {
            label,
            parent_name,
            sub_id,
            module: self.module.clone(),
            type_name: None,
            syntax_tag: TAG_OID,
            access: MibAccess::NotAccessible,
            status: super::node::MibStatus::Current,
            macro_kind: if is_trap1 { MibMacro::TrapType } else { MibMacro::NotificationType },
            index_clause: None,
            implied: false,
            augments: false,
            source_file: self.file.clone(),
            desc_offset: None,
        }))
    }

    /// `<label> ::= TEXTUAL-CONVENTION [DISPLAY-HINT "..."] STATUS <s>
    /// DESCRIPTION "..." [REFERENCE "..."] SYNTAX <type> [restriction]`.
    /// Note there is no `::=` inside this clause to terminate on; the
    /// clause ends at its own `SYNTAX`, unlike OBJECT-TYPE and friends.
    fn parse_textual_convention(&mut self, label: String) -> Result<()> {
        let mut display_hint = None;
        let mut status = super::node::MibStatus::Current;
        loop {
            match self.peek().clone() {
                Token::Ident(ref kw) if kw == "DISPLAY-HINT" => {
                    self.bump()?;
                    match self.bump()? {
                        Token::QuotedString(s) => display_hint = Some(s),
                        other => return Err(self.fatal(&format!("expected quoted DISPLAY-HINT, found {other:?}"))),
                    }
                }
                Token::Ident(ref kw) if kw == "STATUS" => {
                    self.bump()?;
                    status = self.parse_status()?;
                }
                Token::Ident(ref kw) if kw == "DESCRIPTION" => {
                    self.bump()?;
                    self.skip_description()?;
                }
                Token::Ident(ref kw) if kw == "REFERENCE" => {
                    self.bump()?;
                    self.skip_description()?;
                }
                Token::Ident(ref kw) if kw == "SYNTAX" => {
                    self.bump()?;
                    break;
                }
                Token::Eof => return Err(self.fatal("unterminated TEXTUAL-CONVENTION clause")),
                other => return Err(self.fatal(&format!("unexpected token {other:?} in TEXTUAL-CONVENTION clause"))),
            }
        }
        let (tag, _name, restriction) = self.parse_syntax()?;
        self.pending_types.push(RawType {
            name: label,
            module: self.module.clone(),
            base_syntax: tag,
            display_hint,
            restriction,
            status,
        });
        Ok(())
    }

    /// `<label> ::= <base-type> [restriction]`, e.g. `Foo ::= OCTET STRING
    /// (SIZE (0..64))`. A `SEQUENCE { ... }` / `SEQUENCE OF <entry>` body
    /// describes a conceptual row's column list, which this engine already
    /// gets from the OBJECT-TYPE nodes under the table; it carries no
    /// type-table information of its own and is just skipped.
    fn parse_plain_type_assignment(&mut self, label: String) -> Result<()> {
        let name = self.parse_base_type_name()?;
        if name == "SEQUENCE" {
            if matches!(self.peek(), Token::Ident(k) if k == "OF") {
                self.bump()?;
                self.ident()?;
            } else if self.peek() == &Token::LBrace {
                self.bump()?;
                self.skip_balanced_braces_entered()?;
            }
            return Ok(());
        }
        let tag = syntax_tag_for(&name);
        let restriction = self.parse_optional_restriction()?;
        self.pending_types.push(RawType {
            name: label,
            module: self.module.clone(),
            base_syntax: tag,
            display_hint: None,
            restriction,
            status: super::node::MibStatus::Current,
        });
        Ok(())
    }

    fn skip_balanced_braces(&mut self) -> Result<()> {
        self.skip_balanced_braces_entered()
    }

    /// Called just after consuming an opening `{`; consumes up to and
    /// including the matching `}`.
    fn skip_balanced_braces_entered(&mut self) -> Result<()> {
        let mut depth = 1;
        loop {
            match self.peek().clone() {
                Token::LBrace => {
                    depth += 1;
                    self.bump()?;
                }
                Token::RBrace => {
                    depth -= 1;
                    self.bump()?;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Token::Eof => return Err(self.fatal("unterminated brace group")),
                _ => {
                    self.bump()?;
                }
            }
        }
    }

    fn parse_syntax(&mut self) -> Result<(u8, Option<String>, Restriction)> {
        let name = self.parse_base_type_name()?;
        let tag = syntax_tag_for(&name);
        let restriction = self.parse_optional_restriction()?;
        Ok((tag, Some(name), restriction))
    }

    /// `OCTET STRING` and `OBJECT IDENTIFIER` lex as two identifiers since
    /// they're space- rather than hyphen-joined; every other base type name
    /// is a single token.
    fn parse_base_type_name(&mut self) -> Result<String> {
        let first = self.ident()?;
        if first == "OCTET" && matches!(self.peek(), Token::Ident(k) if k == "STRING") {
            self.bump()?;
            return Ok("OCTET STRING".to_string());
        }
        if first == "OBJECT" && matches!(self.peek(), Token::Ident(k) if k == "IDENTIFIER") {
            self.bump()?;
            return Ok("OBJECT IDENTIFIER".to_string());
        }
        Ok(first)
    }

    /// A `{ label(n), ... }` enumeration/BITS list, a `(SIZE (...))` size
    /// restriction, or a bare `(n|n..m|...)` range restriction. Absent
    /// entirely, returns `Restriction::None`.
    fn parse_optional_restriction(&mut self) -> Result<Restriction> {
        match self.peek().clone() {
            Token::LBrace => {
                self.bump()?;
                Ok(Restriction::Enums(self.parse_enum_list()?))
            }
            Token::LParen => {
                self.bump()?;
                if matches!(self.peek(), Token::Ident(k) if k == "SIZE") {
                    self.bump()?;
                    self.expect(&Token::LParen)?;
                    let ranges = self.parse_range_list()?;
                    self.expect(&Token::RParen)?;
                    self.expect(&Token::RParen)?;
                    Ok(Restriction::Size(ranges))
                } else {
                    let ranges = self.parse_range_list()?;
                    self.expect(&Token::RParen)?;
                    Ok(Restriction::Range(ranges))
                }
            }
            _ => Ok(Restriction::None),
        }
    }

    /// Called just after consuming the opening `{`.
    fn parse_enum_list(&mut self) -> Result<Vec<(String, i64)>> {
        let mut out = Vec::new();
        loop {
            match self.peek().clone() {
                Token::RBrace => {
                    self.bump()?;
                    break;
                }
                Token::Ident(name) => {
                    self.bump()?;
                    self.expect(&Token::LParen)?;
                    let n = self.signed_number()?;
                    self.expect(&Token::RParen)?;
                    out.push((name, n));
                    if self.peek() == &Token::Comma {
                        self.bump()?;
                    }
                }
                other => return Err(self.fatal(&format!("unexpected token {other:?} in enumeration"))),
            }
        }
        Ok(out)
    }

    /// Pipe-separated `n` or `n..m` terms; called just after
    /// consuming the restriction's opening `(`.
    fn parse_range_list(&mut self) -> Result<Vec<(i64, i64)>> {
        let mut out = Vec::new();
        loop {
            let lo = self.signed_number()?;
            let hi = if self.peek() == &Token::DotDot {
                self.bump()?;
                self.signed_number()?
            } else {
                lo
            };
            out.push((lo, hi));
            if self.peek() == &Token::Pipe {
                self.bump()?;
                continue;
            }
            break;
        }
        Ok(out)
    }

    fn signed_number(&mut self) -> Result<i64> {
        match self.bump()? {
            Token::Number(n) => Ok(n),
            Token::Minus => Ok(-self.number()?),
            other => Err(self.fatal(&format!("expected number, found {other:?}"))),
        }
    }

    fn parse_access(&mut self) -> Result<MibAccess> {
        let kw = self.ident()?;
        Ok(match kw.as_str() {
            "not-accessible" => MibAccess::NotAccessible,
            "accessible-for-notify" => MibAccess::Notify,
            "read-only" => MibAccess::ReadOnly,
            "read-write" | "write-only" => MibAccess::ReadWrite,
            "read-create" => MibAccess::ReadCreate,
            other => return Err(self.fatal(&format!("unknown ACCESS keyword '{other}'"))),
        })
    }

    fn parse_status(&mut self) -> Result<super::node::MibStatus> {
        let kw = self.ident()?;
        Ok(match kw.as_str() {
            "current" | "mandatory" => super::node::MibStatus::Current,
            "deprecated" => super::node::MibStatus::Deprecated,
            "obsolete" => super::node::MibStatus::Obsolete,
            other => return Err(self.fatal(&format!("unknown STATUS keyword '{other}'"))),
        })
    }

    /// DESCRIPTION clauses are not copied; only the file and byte offset of
    /// the quoted string are recorded for lazy retrieval.
    fn skip_description(&mut self) -> Result<Option<(String, u64)>> {
        match self.bump()? {
            Token::QuotedString(_) => Ok(Some((self.file.clone(), 0))),
            other => Err(self.fatal(&format!("expected quoted DESCRIPTION, found {other:?}"))),
        }
    }

    fn parse_index_clause(&mut self) -> Result<(String, bool)> {
        self.expect(&Token::LBrace)?;
        let mut cols = Vec::new();
        let mut implied = false;
        loop {
            match self.peek().clone() {
                Token::RBrace => break,
                Token::Ident(ref kw) if kw == "IMPLIED" => {
                    self.bump()?;
                    implied = true;
                }
                Token::Ident(name) => {
                    self.bump()?;
                    cols.push(name);
                }
                Token::Comma => {
                    self.bump()?;
                }
                other => return Err(self.fatal(&format!("unexpected token {other:?} in INDEX clause"))),
            }
        }
        self.expect(&Token::RBrace)?;
        Ok((cols.join(","), implied))
    }
}

fn syntax_tag_for(name: &str) -> u8 {
    match name {
        "INTEGER" | "Integer32" => TAG_INTEGER,
        "OCTET STRING" | "DisplayString" => TAG_OCTET_STRING,
        "OBJECT IDENTIFIER" => TAG_OID,
        "IpAddress" => TAG_IP_ADDRESS,
        "Counter" | "Counter32" => TAG_COUNTER32,
        "Counter64" => TAG_COUNTER64,
        "Gauge" | "Gauge32" | "Unsigned32" => TAG_UNSIGNED32,
        "TimeTicks" => TAG_TIME_TICKS,
        "SEQUENCE" => TAG_SEQUENCE,
        "Opaque" => TAG_OPAQUE,
        _ => TAG_INTEGER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_oid_assignment() {
        let src = "TEST DEFINITIONS ::= BEGIN\nenterprises OBJECT IDENTIFIER ::= { internet 4 }\nEND\n";
        let mut p = Parser::new(src, "test.mib").unwrap();
        let m = p.parse_module().unwrap();
        assert_eq!(m.nodes.len(), 1);
        assert_eq!(m.nodes[0].label, "enterprises");
        assert_eq!(m.nodes[0].parent_name, "internet");
        assert_eq!(m.nodes[0].sub_id, 4);
    }

    #[test]
    fn parses_object_type_with_index() {
        let src = r#"
TEST DEFINITIONS ::= BEGIN
ifEntry OBJECT-TYPE
    SYNTAX SEQUENCE
    MAX-ACCESS not-accessible
    STATUS current
    DESCRIPTION "a row"
    INDEX { ifIndex }
    ::= { ifTable 1 }
END
"#;
        let mut p = Parser::new(src, "test.mib").unwrap();
        let m = p.parse_module().unwrap();
        assert_eq!(m.nodes.len(), 1);
        let n = &m.nodes[0];
        assert_eq!(n.label, "ifEntry");
        assert_eq!(n.index_clause.as_deref(), Some("ifIndex"));
        assert_eq!(n.access, MibAccess::NotAccessible);
    }

    #[test]
    fn textual_convention_populates_type_table() {
        let src = r#"
TEST DEFINITIONS ::= BEGIN
DisplayString ::= TEXTUAL-CONVENTION
    DISPLAY-HINT "255a"
    STATUS current
    DESCRIPTION "text"
    SYNTAX OCTET STRING (SIZE (0..255))
rowStatus OBJECT-TYPE
    SYNTAX INTEGER
    MAX-ACCESS read-write
    STATUS current
    DESCRIPTION "status"
    ::= { entry 1 }
END
"#;
        let mut p = Parser::new(src, "test.mib").unwrap();
        let m = p.parse_module().unwrap();
        assert_eq!(m.nodes.len(), 1);
        assert_eq!(m.nodes[0].label, "rowStatus");
        assert_eq!(m.types.len(), 1);
        let ty = &m.types[0];
        assert_eq!(ty.name, "DisplayString");
        assert_eq!(ty.display_hint.as_deref(), Some("255a"));
        assert_eq!(ty.base_syntax, TAG_OCTET_STRING);
        assert_eq!(ty.restriction, Restriction::Size(vec![(0, 255)]));
    }

    #[test]
    fn inline_enum_restriction_becomes_anonymous_type() {
        let src = r#"
TEST DEFINITIONS ::= BEGIN
ifAdminStatus OBJECT-TYPE
    SYNTAX INTEGER { up(1), down(2), testing(3) }
    MAX-ACCESS read-write
    STATUS current
    DESCRIPTION "admin status"
    ::= { ifEntry 7 }
END
"#;
        let mut p = Parser::new(src, "test.mib").unwrap();
        let m = p.parse_module().unwrap();
        assert_eq!(m.nodes.len(), 1);
        assert_eq!(m.types.len(), 1);
        let node = &m.nodes[0];
        assert_eq!(node.type_name.as_deref(), Some("ifAdminStatus@TEST"));
        let ty = &m.types[0];
        assert_eq!(
            ty.restriction,
            Restriction::Enums(vec![
                ("up".to_string(), 1),
                ("down".to_string(), 2),
                ("testing".to_string(), 3),
            ])
        );
    }

    #[test]
    fn plain_type_assignment_registers_alias() {
        let src = "TEST DEFINITIONS ::= BEGIN\nInterfaceIndex ::= INTEGER (1..2147483647)\nEND\n";
        let mut p = Parser::new(src, "test.mib").unwrap();
        let m = p.parse_module().unwrap();
        assert_eq!(m.nodes.len(), 0);
        assert_eq!(m.types.len(), 1);
        assert_eq!(m.types[0].name, "InterfaceIndex");
        assert_eq!(m.types[0].restriction, Restriction::Range(vec![(1, 2147483647)]));
    }

    #[test]
    fn sequence_type_assignment_is_skipped_without_disrupting_parse() {
        let src = r#"
TEST DEFINITIONS ::= BEGIN
IfEntry ::= SEQUENCE { ifIndex INTEGER, ifDescr OCTET STRING }
good OBJECT IDENTIFIER ::= { internet 1 }
END
"#;
        let mut p = Parser::new(src, "test.mib").unwrap();
        let m = p.parse_module().unwrap();
        assert_eq!(m.types.len(), 0);
        assert!(m.nodes.iter().any(|n| n.label == "good"));
    }

    #[test]
    fn recovers_from_malformed_macro() {
        let src = r#"
TEST DEFINITIONS ::= BEGIN
broken GARBAGE ::= weird { stuff here }
good OBJECT IDENTIFIER ::= { internet 99 }
END
"#;
        let mut p = Parser::new(src, "test.mib").unwrap();
        let m = p.parse_module().unwrap();
        assert!(m.nodes.iter().any(|n| n.label == "good"));
    }
}
