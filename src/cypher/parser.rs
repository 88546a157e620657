//! Cypher recursive-descent parser.
//!
//! Produces the clause-sequence AST. Expression parsing is precedence
//! climbing; comparison operators collect into a single chain node so
//! `a < b <= c` evaluates as a conjunction of steps.

use hashbrown::HashMap;

use super::ast::*;
use super::lexer::{Token, TokenKind};
use crate::{Error, Result};

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek2_kind(&self) -> TokenKind {
        self.tokens
            .get(self.pos + 1)
            .map_or(TokenKind::Eof, |t| t.kind)
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            let tok = self.peek();
            Err(self.error(format!(
                "Expected {:?}, got {:?} '{}'",
                kind, tok.kind, tok.text
            )))
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, msg: String) -> Error {
        Error::SyntaxError { position: self.peek().span.start, message: msg }
    }

    /// Identifier-or-keyword as a name (labels and properties may shadow
    /// keywords like `end`).
    fn name(&mut self) -> Result<String> {
        let tok = self.peek();
        if tok.kind == TokenKind::Identifier || tok.text.chars().all(char::is_alphanumeric) {
            let text = tok.text.clone();
            if text.is_empty() {
                return Err(self.error("Expected a name".into()));
            }
            self.advance();
            Ok(text)
        } else {
            Err(self.error(format!("Expected a name, got '{}'", tok.text)))
        }
    }
}

/// Parse a complete statement from tokens.
pub fn parse_statement(tokens: &[Token]) -> Result<Statement> {
    let mut p = Parser::new(tokens);

    // Schema commands have a distinct two-token prefix.
    if (p.at(TokenKind::Create) && p.peek2_kind() == TokenKind::Index)
        || (p.at(TokenKind::Drop) && p.peek2_kind() == TokenKind::Index)
    {
        let stmt = parse_schema(&mut p)?;
        p.eat(TokenKind::Semicolon);
        p.expect(TokenKind::Eof)?;
        return Ok(stmt);
    }

    let mut queries = vec![parse_query(&mut p)?];
    let mut union_all = None;
    while p.eat(TokenKind::Union) {
        let all = p.eat(TokenKind::All);
        match union_all {
            None => union_all = Some(all),
            Some(prev) if prev != all => {
                return Err(p.error("Mixed UNION and UNION ALL".into()))
            }
            _ => {}
        }
        queries.push(parse_query(&mut p)?);
    }

    p.eat(TokenKind::Semicolon);
    if !p.at(TokenKind::Eof) {
        return Err(p.error(format!(
            "Unexpected token after statement: {:?}",
            p.peek_kind()
        )));
    }

    if queries.len() == 1 {
        Ok(Statement::Query(queries.pop().ok_or_else(|| {
            Error::Internal("query vanished during parse".into())
        })?))
    } else {
        Ok(Statement::Union { all: union_all.unwrap_or(false), queries })
    }
}

fn parse_query(p: &mut Parser) -> Result<Query> {
    let mut clauses = Vec::new();
    loop {
        match p.peek_kind() {
            TokenKind::Match | TokenKind::Optional => clauses.push(parse_match(p)?),
            TokenKind::Unwind => clauses.push(parse_unwind(p)?),
            TokenKind::With => clauses.push(parse_with(p)?),
            TokenKind::Create => clauses.push(parse_create(p)?),
            TokenKind::Merge => clauses.push(parse_merge(p)?),
            TokenKind::Set => clauses.push(parse_set(p)?),
            TokenKind::Remove => clauses.push(parse_remove(p)?),
            TokenKind::Delete | TokenKind::Detach => clauses.push(parse_delete(p)?),
            TokenKind::Call => clauses.push(parse_call(p)?),
            TokenKind::Return => {
                clauses.push(parse_return(p)?);
                break;
            }
            TokenKind::Eof | TokenKind::Semicolon | TokenKind::Union => break,
            kind => {
                return Err(p.error(format!("Unexpected token {kind:?} at start of clause")))
            }
        }
    }
    if clauses.is_empty() {
        return Err(p.error("Empty query".into()));
    }
    Ok(Query { clauses })
}

// ============================================================================
// Clauses
// ============================================================================

fn parse_match(p: &mut Parser) -> Result<Clause> {
    let optional = p.eat(TokenKind::Optional);
    p.expect(TokenKind::Match)?;
    let patterns = parse_pattern_list(p)?;
    let where_clause = if p.eat(TokenKind::Where) {
        Some(parse_expr(p)?)
    } else {
        None
    };
    Ok(Clause::Match { optional, patterns, where_clause })
}

fn parse_unwind(p: &mut Parser) -> Result<Clause> {
    p.expect(TokenKind::Unwind)?;
    let expr = parse_expr(p)?;
    p.expect(TokenKind::As)?;
    let alias = p.name()?;
    Ok(Clause::Unwind { expr, alias })
}

fn parse_with(p: &mut Parser) -> Result<Clause> {
    p.expect(TokenKind::With)?;
    let distinct = p.eat(TokenKind::Distinct);
    let items = parse_return_items(p)?;
    let order_by = parse_optional_order_by(p)?;
    let skip = if p.eat(TokenKind::Skip) { Some(parse_expr(p)?) } else { None };
    let limit = if p.eat(TokenKind::Limit) { Some(parse_expr(p)?) } else { None };
    let where_clause = if p.eat(TokenKind::Where) { Some(parse_expr(p)?) } else { None };
    Ok(Clause::With { distinct, items, where_clause, order_by, skip, limit })
}

fn parse_create(p: &mut Parser) -> Result<Clause> {
    p.expect(TokenKind::Create)?;
    let patterns = parse_pattern_list(p)?;
    Ok(Clause::Create { patterns })
}

fn parse_merge(p: &mut Parser) -> Result<Clause> {
    p.expect(TokenKind::Merge)?;
    let pattern = parse_pattern(p)?;

    let mut on_create = Vec::new();
    let mut on_match = Vec::new();
    while p.eat(TokenKind::On) {
        if p.eat(TokenKind::Create) {
            p.expect(TokenKind::Set)?;
            on_create.extend(parse_set_items(p)?);
        } else if p.eat(TokenKind::Match) {
            p.expect(TokenKind::Set)?;
            on_match.extend(parse_set_items(p)?);
        } else {
            return Err(p.error(format!(
                "Expected CREATE or MATCH after ON, got '{}'",
                p.peek().text
            )));
        }
    }

    Ok(Clause::Merge { pattern, on_create, on_match })
}

fn parse_set(p: &mut Parser) -> Result<Clause> {
    p.expect(TokenKind::Set)?;
    Ok(Clause::Set { items: parse_set_items(p)? })
}

fn parse_remove(p: &mut Parser) -> Result<Clause> {
    p.expect(TokenKind::Remove)?;
    let mut items = vec![parse_remove_item(p)?];
    while p.eat(TokenKind::Comma) {
        items.push(parse_remove_item(p)?);
    }
    Ok(Clause::Remove { items })
}

fn parse_remove_item(p: &mut Parser) -> Result<RemoveItem> {
    let variable = p.name()?;
    if p.eat(TokenKind::Dot) {
        let key = p.name()?;
        Ok(RemoveItem::Property { variable, key })
    } else if p.eat(TokenKind::Colon) {
        let label = p.name()?;
        Ok(RemoveItem::Label { variable, label })
    } else {
        Err(p.error("Expected '.' or ':' after REMOVE variable".into()))
    }
}

fn parse_delete(p: &mut Parser) -> Result<Clause> {
    let detach = p.eat(TokenKind::Detach);
    p.expect(TokenKind::Delete)?;
    let mut variables = vec![p.name()?];
    while p.eat(TokenKind::Comma) {
        variables.push(p.name()?);
    }
    Ok(Clause::Delete { variables, detach })
}

fn parse_call(p: &mut Parser) -> Result<Clause> {
    p.expect(TokenKind::Call)?;
    let mut name = p.name()?;
    while p.eat(TokenKind::Dot) {
        let part = p.name()?;
        name = format!("{name}.{part}");
    }

    p.expect(TokenKind::LParen)?;
    let mut args = Vec::new();
    if !p.at(TokenKind::RParen) {
        args.push(parse_expr(p)?);
        while p.eat(TokenKind::Comma) {
            args.push(parse_expr(p)?);
        }
    }
    p.expect(TokenKind::RParen)?;

    let mut yields = Vec::new();
    if p.eat(TokenKind::Yield) {
        yields.push(p.name()?);
        while p.eat(TokenKind::Comma) {
            yields.push(p.name()?);
        }
    }

    Ok(Clause::Call { name, args, yields })
}

fn parse_return(p: &mut Parser) -> Result<Clause> {
    p.expect(TokenKind::Return)?;
    let distinct = p.eat(TokenKind::Distinct);
    let items = parse_return_items(p)?;
    let order_by = parse_optional_order_by(p)?;
    let skip = if p.eat(TokenKind::Skip) { Some(parse_expr(p)?) } else { None };
    let limit = if p.eat(TokenKind::Limit) { Some(parse_expr(p)?) } else { None };
    Ok(Clause::Return { distinct, items, order_by, skip, limit })
}

fn parse_return_items(p: &mut Parser) -> Result<Vec<ReturnItem>> {
    let mut items = Vec::new();
    items.push(parse_return_item(p)?);
    while p.eat(TokenKind::Comma) {
        items.push(parse_return_item(p)?);
    }
    Ok(items)
}

fn parse_return_item(p: &mut Parser) -> Result<ReturnItem> {
    if p.at(TokenKind::Star) {
        p.advance();
        return Ok(ReturnItem { expr: Expr::Star, alias: None });
    }
    let expr = parse_expr(p)?;
    let alias = if p.eat(TokenKind::As) { Some(p.name()?) } else { None };
    Ok(ReturnItem { expr, alias })
}

fn parse_optional_order_by(p: &mut Parser) -> Result<Vec<OrderExpr>> {
    if !p.eat(TokenKind::Order) {
        return Ok(Vec::new());
    }
    p.expect(TokenKind::By)?;
    let mut exprs = Vec::new();
    loop {
        let expr = parse_expr(p)?;
        let ascending = if p.eat(TokenKind::Desc) {
            false
        } else {
            p.eat(TokenKind::Asc);
            true
        };
        exprs.push(OrderExpr { expr, ascending });
        if !p.eat(TokenKind::Comma) {
            break;
        }
    }
    Ok(exprs)
}

fn parse_set_items(p: &mut Parser) -> Result<Vec<SetItem>> {
    let mut items = vec![parse_set_item(p)?];
    while p.eat(TokenKind::Comma) {
        items.push(parse_set_item(p)?);
    }
    Ok(items)
}

fn parse_set_item(p: &mut Parser) -> Result<SetItem> {
    let variable = p.name()?;
    if p.eat(TokenKind::Dot) {
        let key = p.name()?;
        p.expect(TokenKind::Eq)?;
        let value = parse_expr(p)?;
        Ok(SetItem::Property { variable, key, value })
    } else if p.eat(TokenKind::PlusEq) {
        let value = parse_expr(p)?;
        Ok(SetItem::MergeProperties { variable, value })
    } else if p.eat(TokenKind::Eq) {
        let value = parse_expr(p)?;
        Ok(SetItem::AllProperties { variable, value })
    } else if p.eat(TokenKind::Colon) {
        let label = p.name()?;
        Ok(SetItem::Label { variable, label })
    } else {
        Err(p.error("Expected '.', '=', '+=', or ':' after SET variable".into()))
    }
}

// ============================================================================
// Schema
// ============================================================================

fn parse_schema(p: &mut Parser) -> Result<Statement> {
    if p.eat(TokenKind::Create) {
        p.expect(TokenKind::Index)?;
        let (label, property) = parse_index_target(p)?;
        Ok(Statement::Schema(SchemaCommand::CreateIndex { label, property }))
    } else {
        p.expect(TokenKind::Drop)?;
        p.expect(TokenKind::Index)?;
        let (label, property) = parse_index_target(p)?;
        Ok(Statement::Schema(SchemaCommand::DropIndex { label, property }))
    }
}

fn parse_index_target(p: &mut Parser) -> Result<(String, String)> {
    // ON :Label(property)  |  FOR (n:Label) ON (n.property)
    if p.eat(TokenKind::On) {
        p.expect(TokenKind::Colon)?;
        let label = p.name()?;
        p.expect(TokenKind::LParen)?;
        let property = p.name()?;
        p.expect(TokenKind::RParen)?;
        return Ok((label, property));
    }
    p.expect(TokenKind::For)?;
    p.expect(TokenKind::LParen)?;
    let _alias = p.name()?;
    p.expect(TokenKind::Colon)?;
    let label = p.name()?;
    p.expect(TokenKind::RParen)?;
    p.expect(TokenKind::On)?;
    p.expect(TokenKind::LParen)?;
    let _alias2 = p.name()?;
    p.expect(TokenKind::Dot)?;
    let property = p.name()?;
    p.expect(TokenKind::RParen)?;
    Ok((label, property))
}

// ============================================================================
// Patterns
// ============================================================================

fn parse_pattern_list(p: &mut Parser) -> Result<Vec<Pattern>> {
    let mut patterns = vec![parse_pattern(p)?];
    while p.eat(TokenKind::Comma) {
        patterns.push(parse_pattern(p)?);
    }
    Ok(patterns)
}

fn parse_pattern(p: &mut Parser) -> Result<Pattern> {
    let mut elements = Vec::new();
    elements.push(PatternElement::Node(parse_node_pattern(p)?));
    while p.at(TokenKind::Dash) || p.at(TokenKind::LeftArrow) {
        elements.push(PatternElement::Relationship(parse_rel_pattern(p)?));
        elements.push(PatternElement::Node(parse_node_pattern(p)?));
    }
    Ok(Pattern { elements })
}

fn parse_node_pattern(p: &mut Parser) -> Result<NodePattern> {
    p.expect(TokenKind::LParen)?;

    let mut alias = None;
    let mut labels = Vec::new();
    let mut properties = HashMap::new();

    if p.at(TokenKind::Identifier) {
        alias = Some(p.advance().text.clone());
    }
    while p.eat(TokenKind::Colon) {
        labels.push(p.name()?);
    }
    if p.at(TokenKind::LBrace) {
        properties = parse_map_entries(p)?;
    }

    p.expect(TokenKind::RParen)?;
    Ok(NodePattern { alias, labels, properties })
}

fn parse_rel_pattern(p: &mut Parser) -> Result<RelPattern> {
    let left_arrow = p.eat(TokenKind::LeftArrow);
    if !left_arrow {
        p.expect(TokenKind::Dash)?;
    }

    let mut alias = None;
    let mut rel_types = Vec::new();
    let mut properties = HashMap::new();
    let mut var_length = None;

    if p.eat(TokenKind::LBracket) {
        if p.at(TokenKind::Identifier) {
            alias = Some(p.advance().text.clone());
        }
        if p.eat(TokenKind::Colon) {
            rel_types.push(p.name()?);
            while p.eat(TokenKind::Pipe) {
                // Accept both `:A|B` and `:A|:B`.
                p.eat(TokenKind::Colon);
                rel_types.push(p.name()?);
            }
        }
        if p.eat(TokenKind::Star) {
            let min = if p.at(TokenKind::Integer) {
                p.advance().text.parse::<usize>().ok()
            } else {
                None
            };
            if p.eat(TokenKind::DotDot) {
                let max = if p.at(TokenKind::Integer) {
                    p.advance().text.parse::<usize>().ok()
                } else {
                    None
                };
                var_length = Some(VarLength { min, max });
            } else {
                var_length = Some(VarLength { min, max: min });
            }
        }
        if p.at(TokenKind::LBrace) {
            properties = parse_map_entries(p)?;
        }
        p.expect(TokenKind::RBracket)?;
    }

    let direction = if left_arrow {
        p.expect(TokenKind::Dash)?;
        PatternDirection::Left
    } else if p.eat(TokenKind::Arrow) {
        PatternDirection::Right
    } else {
        p.expect(TokenKind::Dash)?;
        PatternDirection::Both
    };

    Ok(RelPattern { alias, rel_types, direction, properties, var_length })
}

fn parse_map_entries(p: &mut Parser) -> Result<HashMap<String, Expr>> {
    p.expect(TokenKind::LBrace)?;
    let mut map = HashMap::new();
    if !p.at(TokenKind::RBrace) {
        loop {
            let key = p.name()?;
            p.expect(TokenKind::Colon)?;
            let value = parse_expr(p)?;
            map.insert(key, value);
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::RBrace)?;
    Ok(map)
}

// ============================================================================
// Expressions
// ============================================================================

fn parse_expr(p: &mut Parser) -> Result<Expr> {
    parse_or(p)
}

fn parse_or(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_xor(p)?;
    while p.eat(TokenKind::Or) {
        let right = parse_xor(p)?;
        left = Expr::BinaryOp {
            left: Box::new(left),
            op: BinaryOp::Or,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_xor(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_and(p)?;
    while p.eat(TokenKind::Xor) {
        let right = parse_and(p)?;
        left = Expr::BinaryOp {
            left: Box::new(left),
            op: BinaryOp::Xor,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_and(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_not(p)?;
    while p.eat(TokenKind::And) {
        let right = parse_not(p)?;
        left = Expr::BinaryOp {
            left: Box::new(left),
            op: BinaryOp::And,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_not(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Not) {
        let expr = parse_not(p)?;
        Ok(Expr::UnaryOp { op: UnaryOp::Not, expr: Box::new(expr) })
    } else {
        parse_comparison(p)
    }
}

fn comp_op(kind: TokenKind) -> Option<CompOp> {
    match kind {
        TokenKind::Eq => Some(CompOp::Eq),
        TokenKind::Neq => Some(CompOp::Neq),
        TokenKind::Lt => Some(CompOp::Lt),
        TokenKind::Lte => Some(CompOp::Lte),
        TokenKind::Gt => Some(CompOp::Gt),
        TokenKind::Gte => Some(CompOp::Gte),
        _ => None,
    }
}

fn parse_comparison(p: &mut Parser) -> Result<Expr> {
    let left = parse_string_op(p)?;

    if p.at(TokenKind::Is) {
        p.advance();
        let negated = p.eat(TokenKind::Not);
        p.expect(TokenKind::Null)?;
        return Ok(Expr::IsNull { expr: Box::new(left), negated });
    }

    if p.eat(TokenKind::In) {
        let list = parse_addition(p)?;
        return Ok(Expr::In { expr: Box::new(left), list: Box::new(list) });
    }

    // Collect the whole chain: a < b <= c.
    let mut rest = Vec::new();
    while let Some(op) = comp_op(p.peek_kind()) {
        p.advance();
        rest.push((op, parse_string_op(p)?));
    }
    if rest.is_empty() {
        Ok(left)
    } else {
        Ok(Expr::Comparison { first: Box::new(left), rest })
    }
}

fn parse_string_op(p: &mut Parser) -> Result<Expr> {
    let left = parse_addition(p)?;

    let op = if p.at(TokenKind::Starts) {
        p.advance();
        p.expect(TokenKind::With)?;
        Some(StringOp::StartsWith)
    } else if p.at(TokenKind::Ends) {
        p.advance();
        p.expect(TokenKind::With)?;
        Some(StringOp::EndsWith)
    } else if p.eat(TokenKind::Contains) {
        Some(StringOp::Contains)
    } else {
        None
    };

    match op {
        Some(op) => {
            let right = parse_addition(p)?;
            Ok(Expr::StringOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            })
        }
        None => Ok(left),
    }
}

fn parse_addition(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_multiplication(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus | TokenKind::Dash => BinaryOp::Sub,
            _ => break,
        };
        p.advance();
        let right = parse_multiplication(p)?;
        left = Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) };
    }
    Ok(left)
}

fn parse_multiplication(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_power(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            _ => break,
        };
        p.advance();
        let right = parse_power(p)?;
        left = Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) };
    }
    Ok(left)
}

fn parse_power(p: &mut Parser) -> Result<Expr> {
    let left = parse_unary(p)?;
    if p.eat(TokenKind::Caret) {
        // Right-associative.
        let right = parse_power(p)?;
        Ok(Expr::BinaryOp {
            left: Box::new(left),
            op: BinaryOp::Pow,
            right: Box::new(right),
        })
    } else {
        Ok(left)
    }
}

fn parse_unary(p: &mut Parser) -> Result<Expr> {
    if p.at(TokenKind::Minus) || p.at(TokenKind::Dash) {
        p.advance();
        let expr = parse_unary(p)?;
        Ok(Expr::UnaryOp { op: UnaryOp::Negate, expr: Box::new(expr) })
    } else {
        parse_postfix(p)
    }
}

fn parse_postfix(p: &mut Parser) -> Result<Expr> {
    let mut expr = parse_primary(p)?;

    // Property chain: n.a.b
    while p.at(TokenKind::Dot) {
        p.advance();
        let key = p.name()?;
        expr = Expr::Property { expr: Box::new(expr), key };
    }

    // Label predicate: n:Person (only on a bare variable).
    if p.at(TokenKind::Colon) {
        if let Expr::Variable(_) = &expr {
            p.advance();
            let label = p.name()?;
            expr = Expr::HasLabel { expr: Box::new(expr), label };
        }
    }

    // Map projection: n {.name, .age}
    if p.at(TokenKind::LBrace) && p.peek2_kind() == TokenKind::Dot {
        if let Expr::Variable(variable) = &expr {
            let variable = variable.clone();
            p.advance(); // {
            let mut keys = Vec::new();
            loop {
                p.expect(TokenKind::Dot)?;
                keys.push(p.name()?);
                if !p.eat(TokenKind::Comma) {
                    break;
                }
            }
            p.expect(TokenKind::RBrace)?;
            expr = Expr::MapProjection { variable, keys };
        }
    }

    Ok(expr)
}

fn parse_primary(p: &mut Parser) -> Result<Expr> {
    match p.peek_kind() {
        TokenKind::Integer => {
            let tok = p.advance();
            let val = tok.text.parse::<i64>().map_err(|_| Error::SyntaxError {
                position: tok.span.start,
                message: "Invalid integer".into(),
            })?;
            Ok(Expr::Literal(Literal::Int(val)))
        }
        TokenKind::Float => {
            let tok = p.advance();
            let val = tok.text.parse::<f64>().map_err(|_| Error::SyntaxError {
                position: tok.span.start,
                message: "Invalid float".into(),
            })?;
            Ok(Expr::Literal(Literal::Float(val)))
        }
        TokenKind::StringLiteral => {
            let tok = p.advance();
            Ok(Expr::Literal(Literal::String(tok.text.clone())))
        }
        TokenKind::True => {
            p.advance();
            Ok(Expr::Literal(Literal::Bool(true)))
        }
        TokenKind::False => {
            p.advance();
            Ok(Expr::Literal(Literal::Bool(false)))
        }
        TokenKind::Null => {
            p.advance();
            Ok(Expr::Literal(Literal::Null))
        }
        TokenKind::Parameter => {
            let tok = p.advance();
            Ok(Expr::Parameter(tok.text.clone()))
        }
        TokenKind::LParen => {
            p.advance();
            let expr = parse_expr(p)?;
            p.expect(TokenKind::RParen)?;
            Ok(expr)
        }
        TokenKind::LBracket => parse_list_or_comprehension(p),
        TokenKind::LBrace => {
            let map = parse_map_entries(p)?;
            Ok(Expr::MapLiteral(map))
        }
        TokenKind::Case => {
            p.advance();
            let operand = if !p.at(TokenKind::When) {
                Some(Box::new(parse_expr(p)?))
            } else {
                None
            };
            let mut whens = Vec::new();
            while p.eat(TokenKind::When) {
                let when = parse_expr(p)?;
                p.expect(TokenKind::Then)?;
                let then = parse_expr(p)?;
                whens.push((when, then));
            }
            let else_expr = if p.eat(TokenKind::Else) {
                Some(Box::new(parse_expr(p)?))
            } else {
                None
            };
            p.expect(TokenKind::End)?;
            Ok(Expr::Case { operand, whens, else_expr })
        }
        TokenKind::Identifier => {
            let tok = p.advance().clone();
            if p.at(TokenKind::LParen) {
                p.advance();
                let mut args = Vec::new();
                let distinct = p.eat(TokenKind::Distinct);
                if p.at(TokenKind::Star) {
                    // count(*)
                    p.advance();
                } else if !p.at(TokenKind::RParen) {
                    args.push(parse_expr(p)?);
                    while p.eat(TokenKind::Comma) {
                        args.push(parse_expr(p)?);
                    }
                }
                p.expect(TokenKind::RParen)?;
                Ok(Expr::FunctionCall { name: tok.text, args, distinct })
            } else {
                Ok(Expr::Variable(tok.text))
            }
        }
        _ => Err(p.error(format!(
            "Unexpected token in expression: {:?} '{}'",
            p.peek_kind(),
            p.peek().text
        ))),
    }
}

/// `[1, 2, 3]` or `[x IN list WHERE pred | body]`.
fn parse_list_or_comprehension(p: &mut Parser) -> Result<Expr> {
    p.expect(TokenKind::LBracket)?;

    // Comprehension: identifier followed by IN.
    if p.at(TokenKind::Identifier) && p.peek2_kind() == TokenKind::In {
        let variable = p.name()?;
        p.expect(TokenKind::In)?;
        let list = parse_expr(p)?;
        let filter = if p.eat(TokenKind::Where) {
            Some(Box::new(parse_expr(p)?))
        } else {
            None
        };
        let map = if p.eat(TokenKind::Pipe) {
            Some(Box::new(parse_expr(p)?))
        } else {
            None
        };
        p.expect(TokenKind::RBracket)?;
        return Ok(Expr::ListComprehension {
            variable,
            list: Box::new(list),
            filter,
            map,
        });
    }

    let mut items = Vec::new();
    if !p.at(TokenKind::RBracket) {
        items.push(parse_expr(p)?);
        while p.eat(TokenKind::Comma) {
            items.push(parse_expr(p)?);
        }
    }
    p.expect(TokenKind::RBracket)?;
    Ok(Expr::List(items))
}

// ============================================================================
// Tests
// ============================================================================
