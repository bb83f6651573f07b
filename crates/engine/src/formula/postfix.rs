// Infix to postfix conversion - classic shunting-yard, extended for
// function calls. A name goes on the operator stack and immediately
// emits a FunctionStart sentinel, marking where that call's arguments
// begin in evaluation order; the name itself is emitted after its
// arguments so the call executes last.

use serde::{Deserialize, Serialize};

use super::tokenizer::{OpCode, ParseInfo, TokenKind};

/// One entry of the postfix program: a token index into the ParseInfo
/// that produced it, or the argument-list sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostfixEntry {
    Token(usize),
    FunctionStart,
}

/// The compiled execution program. Only valid against the ParseInfo it
/// was converted from.
pub type Program = Vec<PostfixEntry>;

/// Convert a token sequence to a postfix program, or a structural error.
pub fn to_postfix(parse: &ParseInfo) -> Result<Program, String> {
    let mut output: Program = Vec::new();
    let mut op_stack: Vec<usize> = Vec::new();

    for (i, tok) in parse.tokens.iter().enumerate() {
        match tok.kind {
            TokenKind::Num | TokenKind::Coord | TokenKind::Str => {
                output.push(PostfixEntry::Token(i));
            }
            TokenKind::Name => {
                op_stack.push(i);
                output.push(PostfixEntry::FunctionStart);
            }
            TokenKind::Space => {}
            TokenKind::Error => return Err(tok.text.clone()),
            TokenKind::Op => {
                let opcode = match tok.opcode {
                    Some(op) => op,
                    None => return Err(format!("Unknown operator '{}'", tok.text)),
                };
                match opcode {
                    OpCode::OpenParen => op_stack.push(i),
                    OpCode::CloseParen => {
                        loop {
                            let top = match op_stack.pop() {
                                Some(top) => top,
                                None => return Err("Missing open parenthesis".to_string()),
                            };
                            if parse.tokens[top].is_op(OpCode::OpenParen) {
                                break;
                            }
                            output.push(PostfixEntry::Token(top));
                        }
                        // A name directly under the paren is the call
                        // this argument list belongs to.
                        if let Some(&top) = op_stack.last() {
                            if parse.tokens[top].kind == TokenKind::Name {
                                op_stack.pop();
                                output.push(PostfixEntry::Token(top));
                            }
                        }
                    }
                    OpCode::Comma => {
                        // Pop down to, but not through, the open paren;
                        // each pop closes out one argument.
                        loop {
                            match op_stack.last() {
                                None => return Err("Missing open parenthesis".to_string()),
                                Some(&top) if parse.tokens[top].is_op(OpCode::OpenParen) => break,
                                Some(&top) => {
                                    op_stack.pop();
                                    output.push(PostfixEntry::Token(top));
                                }
                            }
                        }
                    }
                    _ => {
                        let this_prec = opcode.precedence();
                        while let Some(&top) = op_stack.last() {
                            let top_tok = &parse.tokens[top];
                            if top_tok.kind == TokenKind::Name {
                                // A pending call binds tightest of all.
                                op_stack.pop();
                                output.push(PostfixEntry::Token(top));
                                continue;
                            }
                            if top_tok.is_op(OpCode::OpenParen) {
                                break;
                            }
                            let top_prec = top_tok
                                .opcode
                                .map(|op| op.precedence())
                                .unwrap_or(0);
                            // Unary operators carry negative precedence
                            // and use a strict threshold by absolute
                            // value, which makes chains of them bind
                            // right-to-left.
                            let pops = if this_prec < 0 {
                                top_prec.abs() < this_prec.abs()
                            } else {
                                top_prec.abs() <= this_prec
                            };
                            if pops {
                                op_stack.pop();
                                output.push(PostfixEntry::Token(top));
                            } else {
                                break;
                            }
                        }
                        op_stack.push(i);
                    }
                }
            }
        }
    }

    while let Some(top) = op_stack.pop() {
        if parse.tokens[top].is_op(OpCode::OpenParen) {
            return Err("Missing close parenthesis".to_string());
        }
        output.push(PostfixEntry::Token(top));
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::tokenizer::tokenize;

    /// Render a program as token texts with `<fs>` for the sentinel.
    fn render(text: &str) -> Result<Vec<String>, String> {
        let parse = tokenize(text);
        let program = to_postfix(&parse)?;
        Ok(program
            .iter()
            .map(|entry| match entry {
                PostfixEntry::Token(i) => parse.tokens[*i].text.clone(),
                PostfixEntry::FunctionStart => "<fs>".to_string(),
            })
            .collect())
    }

    #[test]
    fn test_simple_addition() {
        assert_eq!(render("1+2").unwrap(), vec!["1", "2", "+"]);
    }

    #[test]
    fn test_precedence_orders_multiplication_first() {
        assert_eq!(render("1+2*3").unwrap(), vec!["1", "2", "3", "*", "+"]);
        assert_eq!(render("(1+2)*3").unwrap(), vec!["1", "2", "+", "3", "*"]);
    }

    #[test]
    fn test_left_associativity_of_subtraction() {
        assert_eq!(render("5-2-1").unwrap(), vec!["5", "2", "-", "1", "-"]);
    }

    #[test]
    fn test_function_call_emits_sentinel_before_arguments() {
        assert_eq!(
            render("SUM(A1,B2)").unwrap(),
            vec!["<fs>", "A1", "B2", "SUM"]
        );
    }

    #[test]
    fn test_nested_function_calls() {
        assert_eq!(
            render("SUM(MAX(1,2),3)").unwrap(),
            vec!["<fs>", "<fs>", "1", "2", "MAX", "3", "SUM"]
        );
    }

    #[test]
    fn test_range_inside_call() {
        assert_eq!(
            render("SUM(A1:A3)").unwrap(),
            vec!["<fs>", "A1", "A3", ":", "SUM"]
        );
    }

    #[test]
    fn test_bare_name_in_expression() {
        // A bare name still pairs with one sentinel; it resolves to a
        // named value at evaluation time.
        assert_eq!(render("Total+1").unwrap(), vec!["<fs>", "Total", "1", "+"]);
    }

    #[test]
    fn test_sheet_qualified_reference() {
        assert_eq!(
            render("Sheet2!A1+1").unwrap(),
            vec!["<fs>", "Sheet2", "A1", "!", "1", "+"]
        );
    }

    #[test]
    fn test_chained_unary_minus_stays_right_associative() {
        // A naive left-associative conversion would emit M after the
        // first operand only; both must stack up.
        assert_eq!(render("--1").unwrap(), vec!["1", "-", "-"]);
        let parse = tokenize("--1");
        let program = to_postfix(&parse).unwrap();
        assert_eq!(program.len(), 3);
    }

    #[test]
    fn test_unary_minus_binds_tighter_than_binary() {
        assert_eq!(render("2*-3").unwrap(), vec!["2", "3", "-", "*"]);
    }

    #[test]
    fn test_unary_minus_binds_tighter_than_percent() {
        // -5% is (-5)%: the sign attaches before the percent applies.
        assert_eq!(render("-5%").unwrap(), vec!["5", "-", "%"]);
    }

    #[test]
    fn test_comparison_binds_loosest() {
        assert_eq!(
            render("1+2<3*4").unwrap(),
            vec!["1", "2", "+", "3", "4", "*", "<"]
        );
    }

    #[test]
    fn test_missing_open_paren() {
        assert_eq!(render("1+2)"), Err("Missing open parenthesis".to_string()));
    }

    #[test]
    fn test_missing_close_paren() {
        assert_eq!(render("(1+2"), Err("Missing close parenthesis".to_string()));
    }

    #[test]
    fn test_error_token_aborts_conversion() {
        let err = render("1+2;3").unwrap_err();
        assert!(err.contains(';'), "unexpected error: {}", err);
    }

    #[test]
    fn test_empty_argument_list() {
        assert_eq!(render("PI()").unwrap(), vec!["<fs>", "PI"]);
    }
}
