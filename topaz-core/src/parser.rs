//! Recursive-descent parser for Topaz.
//!
//! Expressions use one function per precedence level, lowest binding
//! first:
//!
//!   || -> && -> == != -> > >= < <= -> + - -> * / % -> unary - ! -> primary
//!
//! Binary levels loop instead of recursing on the right operand, so all
//! of them associate to the left. The first error aborts the parse.

use crate::ast::{BinaryOp, Expr, ExprKind, Param, Stmt, StmtKind, UnaryOp};
use crate::error::CoreError;
use crate::lexer::{Token, TokenKind};
use crate::types::{Type, TypeKind};
use crate::value::Value;

/// Non-empty token sequence. End-of-input errors point at `last`.
#[derive(Clone, Copy)]
struct Tokens<'t> {
    all: &'t [Token],
    last: &'t Token,
}

impl<'t> Tokens<'t> {
    fn get(self, index: usize) -> Option<&'t Token> {
        self.all.get(index)
    }

    fn len(self) -> usize {
        self.all.len()
    }
}

/// Parse a whole token sequence into statements.
///
/// The cursor is local to each call, so the same tokens can be parsed
/// any number of times with identical results.
pub fn parse(tokens: &[Token]) -> Result<Vec<Stmt>, CoreError> {
    let Some(last) = tokens.last() else {
        return Ok(Vec::new());
    };
    let tokens = Tokens { all: tokens, last };
    let mut position = 0;
    let mut statements = Vec::new();
    while position < tokens.len() {
        statements.push(parse_stmt(tokens, &mut position)?);
    }
    Ok(statements)
}

fn parse_stmt(tokens: Tokens<'_>, position: &mut usize) -> Result<Stmt, CoreError> {
    let token = peek(tokens, *position)?;
    match token.kind {
        TokenKind::Let => {
            *position += 1;
            parse_var_decl(tokens, position, token.line)
        }
        TokenKind::Fun => {
            *position += 1;
            parse_func_decl(tokens, position, token.line)
        }
        TokenKind::Return => {
            *position += 1;
            parse_return(tokens, position, token.line)
        }
        TokenKind::Ident => parse_ident_stmt(tokens, position),
        _ => Err(error_at(
            token,
            format!("unsupported statement starting with '{}'", token.lexeme),
        )),
    }
}

fn parse_var_decl(tokens: Tokens<'_>, position: &mut usize, line: u32) -> Result<Stmt, CoreError> {
    let ty = parse_type(tokens, position)?;
    expect(
        tokens,
        position,
        TokenKind::Colon,
        &format!("expected ':' between type and variable name (write 'let {ty}: <name>')"),
    )?;
    let name = parse_name(tokens, position, "variable")?;
    let init = if eat(tokens, position, TokenKind::Assign) {
        Some(parse_expr(tokens, position)?)
    } else {
        None
    };
    expect(
        tokens,
        position,
        TokenKind::Semi,
        "expected ';' at the end of the variable declaration",
    )?;

    Ok(Stmt {
        kind: StmtKind::VarDecl { ty, name, init },
        line,
    })
}

fn parse_func_decl(tokens: Tokens<'_>, position: &mut usize, line: u32) -> Result<Stmt, CoreError> {
    let name = parse_name(tokens, position, "function")?;

    let mut params = Vec::new();
    if eat(tokens, position, TokenKind::LParen) && !eat(tokens, position, TokenKind::RParen) {
        loop {
            let param_name = parse_name(tokens, position, "parameter")?;
            expect(
                tokens,
                position,
                TokenKind::Colon,
                "expected ':' between parameter name and type",
            )?;
            let ty = parse_type(tokens, position)?;
            params.push(Param {
                name: param_name,
                ty,
            });
            if eat(tokens, position, TokenKind::Comma) {
                continue;
            }
            expect(
                tokens,
                position,
                TokenKind::RParen,
                "expected ',' or ')' after a parameter",
            )?;
            break;
        }
    }

    let return_type = if eat(tokens, position, TokenKind::Arrow) {
        parse_type(tokens, position)?
    } else {
        Type::noth()
    };

    expect(
        tokens,
        position,
        TokenKind::LBrace,
        &format!("expected '{{' to open the body of function '{name}'"),
    )?;
    let mut body = Vec::new();
    loop {
        match tokens.get(*position) {
            Some(token) if token.kind == TokenKind::RBrace => {
                *position += 1;
                break;
            }
            Some(_) => body.push(parse_stmt(tokens, position)?),
            None => {
                return Err(end_of_input(
                    tokens,
                    &format!("expected '}}' to close the body of function '{name}'"),
                ));
            }
        }
    }

    Ok(Stmt {
        kind: StmtKind::FuncDecl {
            name,
            params,
            return_type,
            body,
        },
        line,
    })
}

fn parse_return(tokens: Tokens<'_>, position: &mut usize, line: u32) -> Result<Stmt, CoreError> {
    if eat(tokens, position, TokenKind::Semi) {
        return Ok(Stmt {
            kind: StmtKind::Return(None),
            line,
        });
    }
    let value = parse_expr(tokens, position)?;
    expect(
        tokens,
        position,
        TokenKind::Semi,
        "expected ';' at the end of the return statement",
    )?;
    Ok(Stmt {
        kind: StmtKind::Return(Some(value)),
        line,
    })
}

/// `name = expr;`, `name op= expr;` or `name(args);`.
fn parse_ident_stmt(tokens: Tokens<'_>, position: &mut usize) -> Result<Stmt, CoreError> {
    let ident = next(tokens, position)?;
    let name = ident.lexeme.clone();
    let line = ident.line;

    let operator = next(tokens, position)?;
    let kind = match operator.kind {
        TokenKind::Assign => {
            let value = parse_expr(tokens, position)?;
            StmtKind::VarAssign { name, value }
        }
        TokenKind::PlusEq
        | TokenKind::MinusEq
        | TokenKind::StarEq
        | TokenKind::SlashEq
        | TokenKind::PercentEq => {
            let op = match operator.kind {
                TokenKind::PlusEq => BinaryOp::Add,
                TokenKind::MinusEq => BinaryOp::Sub,
                TokenKind::StarEq => BinaryOp::Mul,
                TokenKind::SlashEq => BinaryOp::Div,
                _ => BinaryOp::Rem,
            };
            let rhs = parse_expr(tokens, position)?;
            let current = Expr {
                kind: ExprKind::Var(name.clone()),
                line,
            };
            StmtKind::VarAssign {
                value: Expr::binary(op, current, rhs, operator.line),
                name,
            }
        }
        TokenKind::LParen => {
            let args = parse_call_args(tokens, position)?;
            StmtKind::FuncCall { name, args }
        }
        _ => {
            return Err(error_at(
                operator,
                format!(
                    "unsupported statement: expected '=', a compound assignment or '(' after '{name}', found '{}'",
                    operator.lexeme
                ),
            ));
        }
    };
    expect(
        tokens,
        position,
        TokenKind::Semi,
        "expected ';' at the end of the statement",
    )?;

    Ok(Stmt { kind, line })
}

/// `[const] <primitive> [?]`
fn parse_type(tokens: Tokens<'_>, position: &mut usize) -> Result<Type, CoreError> {
    let is_const = eat(tokens, position, TokenKind::Const);
    let token = next(tokens, position)?;
    let kind = match token.kind {
        TokenKind::Char => TypeKind::Char,
        TokenKind::Short => TypeKind::Short,
        TokenKind::Int => TypeKind::Int,
        TokenKind::Long => TypeKind::Long,
        TokenKind::Float => TypeKind::Float,
        TokenKind::Double => TypeKind::Double,
        TokenKind::Bool => TypeKind::Bool,
        TokenKind::Noth => TypeKind::Noth,
        _ => {
            return Err(error_at(
                token,
                format!("expected a type, found '{}'", token.lexeme),
            ));
        }
    };
    let is_nullable = eat(tokens, position, TokenKind::Question);

    Ok(Type {
        kind,
        name: token.lexeme.clone(),
        is_const,
        is_pointer: false,
        is_nullable,
    })
}

fn parse_name(tokens: Tokens<'_>, position: &mut usize, what: &str) -> Result<String, CoreError> {
    let token = next(tokens, position)?;
    match token.kind {
        TokenKind::Ident => Ok(token.lexeme.clone()),
        kind if kind.is_keyword() => Err(error_at(
            token,
            format!(
                "'{}' is a keyword and cannot be used as a {what} name; choose a unique identifier",
                token.lexeme
            ),
        )),
        _ => Err(error_at(
            token,
            format!("expected a {what} name, found '{}'", token.lexeme),
        )),
    }
}

fn parse_call_args(tokens: Tokens<'_>, position: &mut usize) -> Result<Vec<Expr>, CoreError> {
    let mut args = Vec::new();
    if eat(tokens, position, TokenKind::RParen) {
        return Ok(args);
    }
    loop {
        args.push(parse_expr(tokens, position)?);
        if eat(tokens, position, TokenKind::Comma) {
            continue;
        }
        expect(
            tokens,
            position,
            TokenKind::RParen,
            "expected ',' or ')' after a call argument",
        )?;
        return Ok(args);
    }
}

fn parse_expr(tokens: Tokens<'_>, position: &mut usize) -> Result<Expr, CoreError> {
    parse_or(tokens, position)
}

fn parse_or(tokens: Tokens<'_>, position: &mut usize) -> Result<Expr, CoreError> {
    parse_left_assoc(tokens, position, &[(TokenKind::OrOr, BinaryOp::Or)], parse_and)
}

fn parse_and(tokens: Tokens<'_>, position: &mut usize) -> Result<Expr, CoreError> {
    parse_left_assoc(
        tokens,
        position,
        &[(TokenKind::AndAnd, BinaryOp::And)],
        parse_equality,
    )
}

fn parse_equality(tokens: Tokens<'_>, position: &mut usize) -> Result<Expr, CoreError> {
    parse_left_assoc(
        tokens,
        position,
        &[
            (TokenKind::EqEq, BinaryOp::Eq),
            (TokenKind::NotEq, BinaryOp::NotEq),
        ],
        parse_relational,
    )
}

fn parse_relational(tokens: Tokens<'_>, position: &mut usize) -> Result<Expr, CoreError> {
    parse_left_assoc(
        tokens,
        position,
        &[
            (TokenKind::Greater, BinaryOp::Greater),
            (TokenKind::GreaterEq, BinaryOp::GreaterEq),
            (TokenKind::Less, BinaryOp::Less),
            (TokenKind::LessEq, BinaryOp::LessEq),
        ],
        parse_additive,
    )
}

fn parse_additive(tokens: Tokens<'_>, position: &mut usize) -> Result<Expr, CoreError> {
    parse_left_assoc(
        tokens,
        position,
        &[
            (TokenKind::Plus, BinaryOp::Add),
            (TokenKind::Minus, BinaryOp::Sub),
        ],
        parse_multiplicative,
    )
}

fn parse_multiplicative(tokens: Tokens<'_>, position: &mut usize) -> Result<Expr, CoreError> {
    parse_left_assoc(
        tokens,
        position,
        &[
            (TokenKind::Star, BinaryOp::Mul),
            (TokenKind::Slash, BinaryOp::Div),
            (TokenKind::Percent, BinaryOp::Rem),
        ],
        parse_unary,
    )
}

fn parse_left_assoc(
    tokens: Tokens<'_>,
    position: &mut usize,
    operators: &[(TokenKind, BinaryOp)],
    operand: fn(Tokens<'_>, &mut usize) -> Result<Expr, CoreError>,
) -> Result<Expr, CoreError> {
    let mut expr = operand(tokens, position)?;
    while let Some(token) = tokens.get(*position) {
        let Some(&(_, op)) = operators.iter().find(|(kind, _)| *kind == token.kind) else {
            break;
        };
        *position += 1;
        let rhs = operand(tokens, position)?;
        expr = Expr::binary(op, expr, rhs, token.line);
    }
    Ok(expr)
}

fn parse_unary(tokens: Tokens<'_>, position: &mut usize) -> Result<Expr, CoreError> {
    let token = peek(tokens, *position)?;
    let op = match token.kind {
        TokenKind::Minus => UnaryOp::Neg,
        TokenKind::Not => UnaryOp::Not,
        _ => return parse_primary(tokens, position),
    };
    *position += 1;
    let operand = parse_unary(tokens, position)?;
    Ok(Expr {
        kind: ExprKind::Unary {
            op,
            operand: Box::new(operand),
        },
        line: token.line,
    })
}

fn parse_primary(tokens: Tokens<'_>, position: &mut usize) -> Result<Expr, CoreError> {
    let token = next(tokens, position)?;
    let line = token.line;
    let value = match token.kind {
        TokenKind::LParen => {
            let expr = parse_expr(tokens, position)?;
            expect(
                tokens,
                position,
                TokenKind::RParen,
                "expected ')' to close the parenthesized expression",
            )?;
            return Ok(expr);
        }
        TokenKind::Ident => {
            let name = token.lexeme.clone();
            if eat(tokens, position, TokenKind::LParen) {
                let args = parse_call_args(tokens, position)?;
                return Ok(Expr {
                    kind: ExprKind::Call { name, args },
                    line,
                });
            }
            return Ok(Expr {
                kind: ExprKind::Var(name),
                line,
            });
        }
        TokenKind::CharLiteral => match token.lexeme.as_bytes() {
            [byte] => Value::Char(*byte),
            _ => return Err(error_at(token, "character literal must hold one byte")),
        },
        TokenKind::ShortLiteral => Value::Short(parse_number(token, "short")?),
        TokenKind::IntLiteral => Value::Int(parse_number(token, "int")?),
        TokenKind::LongLiteral => Value::Long(parse_number(token, "long")?),
        TokenKind::FloatLiteral => Value::Float(parse_number(token, "float")?),
        TokenKind::DoubleLiteral => Value::Double(parse_number(token, "double")?),
        TokenKind::BoolLiteral => Value::Bool(token.lexeme == "true"),
        TokenKind::StringLiteral => Value::Str(token.lexeme.clone()),
        _ => {
            return Err(error_at(
                token,
                format!("unsupported expression starting with '{}'", token.lexeme),
            ));
        }
    };
    Ok(Expr::literal(value, line))
}

fn parse_number<T: std::str::FromStr>(token: &Token, what: &str) -> Result<T, CoreError> {
    token.lexeme.parse::<T>().map_err(|_| {
        error_at(
            token,
            format!("{what} literal '{}' is out of range", token.lexeme),
        )
    })
}

fn peek(tokens: Tokens<'_>, position: usize) -> Result<&Token, CoreError> {
    tokens
        .get(position)
        .ok_or_else(|| error_at(tokens.last, "unexpected end of input"))
}

fn next<'t>(tokens: Tokens<'t>, position: &mut usize) -> Result<&'t Token, CoreError> {
    let token = peek(tokens, *position)?;
    *position += 1;
    Ok(token)
}

/// Consume the current token if it has the given kind.
fn eat(tokens: Tokens<'_>, position: &mut usize, kind: TokenKind) -> bool {
    match tokens.get(*position) {
        Some(token) if token.kind == kind => {
            *position += 1;
            true
        }
        _ => false,
    }
}

fn expect<'t>(
    tokens: Tokens<'t>,
    position: &mut usize,
    kind: TokenKind,
    message: &str,
) -> Result<&'t Token, CoreError> {
    match tokens.get(*position) {
        Some(token) if token.kind == kind => {
            *position += 1;
            Ok(token)
        }
        Some(token) => Err(error_at(
            token,
            format!("{message}, found '{}'", token.lexeme),
        )),
        None => Err(end_of_input(tokens, message)),
    }
}

fn error_at(token: &Token, message: impl Into<String>) -> CoreError {
    CoreError::parse(&token.source, token.line, message)
}

fn end_of_input(tokens: Tokens<'_>, message: &str) -> CoreError {
    error_at(tokens.last, format!("{message}, found end of input"))
}
