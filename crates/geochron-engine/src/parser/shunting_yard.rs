//! Infix to postfix (reverse Polish) conversion.

use super::{ParseError, Span, Token, TokenKind};
use crate::functions::lookup_function;

/// Postfix stream in emission order plus the argument counts observed for
/// each completed call. The counts are not embedded in the emitted tokens;
/// arity validation happens against the function table during the tree health
/// check, and the observations surface in the parse status report.
#[derive(Debug, Clone, PartialEq)]
pub struct PostfixOutput {
    pub tokens: Vec<Token>,
    pub observed_arg_counts: Vec<(String, usize)>,
}

fn precedence(kind: &TokenKind) -> u8 {
    match kind {
        TokenKind::Caret => 3,
        TokenKind::Star | TokenKind::Slash => 2,
        // Additive and comparison operators share the lowest class.
        _ => 1,
    }
}

/// Shunting-yard with two dialect-specific extensions: implicit unary
/// negation (a `-` after an operator, function, comma, or opening paren
/// emits `-1` and pushes `*` directly, bypassing precedence popping) and
/// per-call argument counting via parallel value/count stacks.
pub fn infix_to_postfix(tokens: &[Token]) -> Result<PostfixOutput, ParseError> {
    let mut output: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut stack: Vec<Token> = Vec::new();
    let mut were_values: Vec<bool> = Vec::new();
    let mut arg_counts: Vec<usize> = Vec::new();
    let mut observed_arg_counts: Vec<(String, usize)> = Vec::new();
    let mut last_was_operation_or_function = true;

    let emit_value = |output: &mut Vec<Token>, were_values: &mut Vec<bool>, token: Token| {
        output.push(token);
        if let Some(top) = were_values.last_mut() {
            *top = true;
        }
    };

    for token in tokens {
        match &token.kind {
            TokenKind::Eof => break,
            TokenKind::Number(_) | TokenKind::Reference { .. } => {
                emit_value(&mut output, &mut were_values, token.clone());
                last_was_operation_or_function = false;
            }
            TokenKind::Ident(name) => {
                if lookup_function(name).is_some() {
                    stack.push(token.clone());
                    were_values.push(false);
                    arg_counts.push(0);
                    last_was_operation_or_function = true;
                } else {
                    // Bare named constant.
                    emit_value(&mut output, &mut were_values, token.clone());
                    last_was_operation_or_function = false;
                }
            }
            TokenKind::Comma => {
                loop {
                    match stack.last() {
                        Some(top) if top.kind == TokenKind::LParen => break,
                        Some(_) => output.push(stack.pop().expect("stack top checked")),
                        None => {
                            return Err(ParseError::new(
                                "Misplaced comma or mismatched parentheses",
                                token.span,
                            ));
                        }
                    }
                }
                match (were_values.pop(), arg_counts.last_mut()) {
                    (Some(saw_value), Some(count)) => {
                        if saw_value {
                            *count += 1;
                        }
                        were_values.push(false);
                    }
                    _ => {
                        return Err(ParseError::new(
                            "Argument separator outside a function call",
                            token.span,
                        ));
                    }
                }
                last_was_operation_or_function = true;
            }
            TokenKind::Minus if last_was_operation_or_function => {
                // Implicit unary negation: `-x` becomes `-1 * x`. The `*` is
                // pushed without precedence popping so `2 ^ -3` keeps the
                // exponent on top of the stack.
                emit_value(
                    &mut output,
                    &mut were_values,
                    Token {
                        kind: TokenKind::Number("-1".to_string()),
                        span: token.span,
                    },
                );
                stack.push(Token {
                    kind: TokenKind::Star,
                    span: token.span,
                });
            }
            kind if kind.is_operator() => {
                while let Some(top) = stack.last() {
                    if top.kind.is_operator() && precedence(&top.kind) >= precedence(kind) {
                        output.push(stack.pop().expect("stack top checked"));
                    } else {
                        break;
                    }
                }
                stack.push(token.clone());
                last_was_operation_or_function = true;
            }
            TokenKind::LParen => {
                stack.push(token.clone());
                last_was_operation_or_function = true;
            }
            TokenKind::RParen => {
                loop {
                    match stack.pop() {
                        Some(top) if top.kind == TokenKind::LParen => break,
                        Some(top) => output.push(top),
                        None => {
                            return Err(ParseError::new(
                                "Mismatched parentheses",
                                token.span,
                            ));
                        }
                    }
                }
                if let Some(top) = stack.last() {
                    if matches!(&top.kind, TokenKind::Ident(name) if lookup_function(name).is_some())
                    {
                        let function = stack.pop().expect("stack top checked");
                        let mut count = arg_counts.pop().unwrap_or(0);
                        if were_values.pop().unwrap_or(false) {
                            count += 1;
                        }
                        if let TokenKind::Ident(name) = &function.kind {
                            observed_arg_counts.push((name.clone(), count));
                        }
                        output.push(function);
                    }
                }
                if let Some(top) = were_values.last_mut() {
                    *top = true;
                }
                last_was_operation_or_function = false;
            }
            _ => {
                return Err(ParseError::new(
                    format!("Unexpected token {:?}", token.kind),
                    token.span,
                ));
            }
        }
    }

    while let Some(top) = stack.pop() {
        if top.kind == TokenKind::LParen {
            return Err(ParseError::new("Mismatched parentheses", top.span));
        }
        output.push(top);
    }

    Ok(PostfixOutput {
        tokens: output,
        observed_arg_counts,
    })
}
