//! Recursive descent parser for pointcut expressions

use crate::classfile::flag::access_flags::*;
use crate::common::error::{Error, Result};

use super::ast::{
    ExpressionNode, FieldPattern, MethodPattern, ModifierPattern, ParamEntry, Segment, TypePattern,
};
use super::lexer::{tokenize, LexicalToken, Token};

/// Parse a pointcut expression into its predicate tree.
pub fn parse_expression(source: &str) -> Result<ExpressionNode> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(Error::expression("empty pointcut expression"));
    }
    let mut parser = Parser { source, tokens, current: 0 };
    let node = parser.parse_or()?;
    if !parser.is_at_end() {
        return Err(parser.error_at_current("end of expression"));
    }
    Ok(node)
}

fn modifier_flag(word: &str) -> Option<u16> {
    match word {
        "public" => Some(ACC_PUBLIC),
        "private" => Some(ACC_PRIVATE),
        "protected" => Some(ACC_PROTECTED),
        "static" => Some(ACC_STATIC),
        "final" => Some(ACC_FINAL),
        "synchronized" => Some(ACC_SYNCHRONIZED),
        "native" => Some(ACC_NATIVE),
        "transient" => Some(ACC_TRANSIENT),
        "abstract" => Some(ACC_ABSTRACT),
        _ => None,
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<LexicalToken>,
    current: usize,
}

impl Parser<'_> {
    fn is_at_end(&self) -> bool {
        self.current >= self.tokens.len()
    }

    fn peek(&self) -> Option<&LexicalToken> {
        self.tokens.get(self.current)
    }

    fn peek_next(&self) -> Option<&LexicalToken> {
        self.tokens.get(self.current + 1)
    }

    fn check(&self, token: &Token) -> bool {
        self.peek().map(|t| t.is(token)).unwrap_or(false)
    }

    fn check_word(&self, word: &str) -> bool {
        self.peek()
            .map(|t| t.is(&Token::Word) && t.lexeme == word)
            .unwrap_or(false)
    }

    fn advance(&mut self) -> &LexicalToken {
        if self.current < self.tokens.len() {
            self.current += 1;
        }
        let index = self.current.saturating_sub(1).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn consume(&mut self, token: &Token, expected: &str) -> Result<&LexicalToken> {
        if self.check(token) {
            Ok(self.advance())
        } else {
            Err(self.error_at_current(expected))
        }
    }

    fn error_at_current(&self, expected: &str) -> Error {
        match self.peek() {
            Some(found) => Error::expression(format!(
                "expected {expected}, found '{}' at offset {} in '{}'",
                found.lexeme, found.offset, self.source
            )),
            None => Error::expression(format!(
                "expected {expected}, found end of input in '{}'",
                self.source
            )),
        }
    }

    // Boolean grammar

    fn parse_or(&mut self) -> Result<ExpressionNode> {
        let mut node = self.parse_and()?;
        while self.check(&Token::PipePipe) || self.check_word("OR") {
            self.advance();
            let right = self.parse_and()?;
            node = ExpressionNode::Or(Box::new(node), Box::new(right));
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> Result<ExpressionNode> {
        let mut node = self.parse_unary()?;
        while self.check(&Token::AmpAmp) || self.check_word("AND") {
            self.advance();
            let right = self.parse_unary()?;
            node = ExpressionNode::And(Box::new(node), Box::new(right));
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<ExpressionNode> {
        if self.check(&Token::Bang) || self.check_word("NOT") {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(ExpressionNode::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<ExpressionNode> {
        if self.match_token(&Token::LParen) {
            let node = self.parse_or()?;
            self.consume(&Token::RParen, "')'")?;
            return Ok(node);
        }
        if !self.check(&Token::Word) {
            return Err(self.error_at_current("pointcut expression"));
        }
        let word = self.peek().map(|t| t.lexeme.clone()).unwrap_or_default();
        let keyword_leaf = matches!(
            word.as_str(),
            "call" | "execution" | "get" | "set" | "handler" | "within" | "withincode"
                | "cflow" | "cflowbelow"
        ) && self.peek_next().map(|t| t.is(&Token::LParen)).unwrap_or(false);
        if !keyword_leaf {
            return self.parse_reference();
        }
        self.advance();
        self.consume(&Token::LParen, "'('")?;
        let node = match word.as_str() {
            "call" => ExpressionNode::Call(self.parse_method_pattern()?),
            "execution" => ExpressionNode::Execution(self.parse_method_pattern()?),
            "withincode" => ExpressionNode::WithinCode(self.parse_method_pattern()?),
            "get" => ExpressionNode::Get(self.parse_field_pattern()?),
            "set" => ExpressionNode::Set(self.parse_field_pattern()?),
            "handler" => ExpressionNode::Handler(self.parse_type_chain()?),
            "within" => ExpressionNode::Within(self.parse_type_chain()?),
            "cflow" => ExpressionNode::Cflow(Box::new(self.parse_or()?)),
            "cflowbelow" => ExpressionNode::CflowBelow(Box::new(self.parse_or()?)),
            _ => unreachable!(),
        };
        self.consume(&Token::RParen, "')'")?;
        Ok(node)
    }

    fn parse_reference(&mut self) -> Result<ExpressionNode> {
        let name = self.parse_dotted_identifier("pointcut reference")?;
        Ok(ExpressionNode::Reference(name))
    }

    /// A dotted identifier without wildcards (`@Marker` names, references).
    fn parse_dotted_identifier(&mut self, what: &str) -> Result<String> {
        let mut name = String::new();
        loop {
            let lexeme = self.consume(&Token::Word, what)?.lexeme.clone();
            if lexeme.contains('*') {
                return Err(Error::expression(format!(
                    "wildcard not allowed in {what}: '{lexeme}' in '{}'",
                    self.source
                )));
            }
            name.push_str(&lexeme);
            if self.match_token(&Token::Dot) {
                name.push('.');
            } else {
                return Ok(name);
            }
        }
    }

    // Pattern grammar

    fn parse_method_pattern(&mut self) -> Result<MethodPattern> {
        let modifiers = self.parse_modifier_clause()?;
        let annotations = self.parse_annotation_clause()?;
        let first = self.parse_type_chain()?;
        let (return_type, member_chain) = if self.check(&Token::Word) {
            (Some(first), self.parse_type_chain()?)
        } else {
            (None, first)
        };
        let (declaring_type, name) = self.split_member_chain(member_chain, "method")?;

        self.consume(&Token::LParen, "'(' starting a parameter list")?;
        let parameters = self.parse_parameter_clause()?;

        if return_type.is_none() && !name.matches("new") {
            return Err(Error::expression(format!(
                "method pattern requires a return type (only constructor patterns named 'new' omit it) in '{}'",
                self.source
            )));
        }
        Ok(MethodPattern { modifiers, annotations, return_type, declaring_type, name, parameters })
    }

    fn parse_field_pattern(&mut self) -> Result<FieldPattern> {
        let modifiers = self.parse_modifier_clause()?;
        let annotations = self.parse_annotation_clause()?;
        let field_type = self.parse_type_chain()?;
        if !self.check(&Token::Word) {
            return Err(Error::expression(format!(
                "field pattern requires both a type and a declaring.field name in '{}'",
                self.source
            )));
        }
        let member_chain = self.parse_type_chain()?;
        let (declaring_type, name) = self.split_member_chain(member_chain, "field")?;
        Ok(FieldPattern { modifiers, annotations, field_type, declaring_type, name })
    }

    /// Last segment of the chain is the member name, the rest the declaring
    /// type pattern.
    fn split_member_chain(
        &self,
        mut chain: TypePattern,
        what: &str,
    ) -> Result<(TypePattern, Segment)> {
        if chain.dims > 0 {
            return Err(Error::expression(format!(
                "{what} name pattern may not carry array brackets in '{}'",
                self.source
            )));
        }
        let name = chain
            .segments
            .pop()
            .ok_or_else(|| self.error_at_current(&format!("{what} name pattern")))?;
        if matches!(name, Segment::DeepAny) {
            return Err(Error::expression(format!(
                "{what} name pattern may not be '..' in '{}'",
                self.source
            )));
        }
        Ok((TypePattern { segments: chain.segments, dims: 0 }, name))
    }

    fn parse_modifier_clause(&mut self) -> Result<ModifierPattern> {
        let mut pattern = ModifierPattern::default();
        loop {
            let negated = if self.check(&Token::Bang) {
                true
            } else if self.check_word("NOT")
                && self
                    .peek_next()
                    .map(|t| t.is(&Token::Word) && modifier_flag(&t.lexeme).is_some())
                    .unwrap_or(false)
            {
                true
            } else {
                false
            };
            if negated {
                self.advance();
                let lexeme = self.consume(&Token::Word, "modifier after negation")?.lexeme.clone();
                match modifier_flag(&lexeme) {
                    Some(flag) => pattern.forbidden |= flag,
                    None => {
                        return Err(Error::expression(format!(
                            "invalid modifier token '{lexeme}' in '{}'",
                            self.source
                        )))
                    }
                }
                continue;
            }
            let positive = match self.peek() {
                Some(token) if token.is(&Token::Word) => modifier_flag(&token.lexeme),
                _ => None,
            };
            match positive {
                Some(flag) => {
                    pattern.required |= flag;
                    self.advance();
                }
                None => break,
            }
        }
        Ok(pattern)
    }

    fn parse_annotation_clause(&mut self) -> Result<Vec<String>> {
        let mut annotations = Vec::new();
        while self.match_token(&Token::At) {
            annotations.push(self.parse_dotted_identifier("annotation name")?);
        }
        Ok(annotations)
    }

    /// Dotted segment chain with optional trailing `[]` pairs.
    fn parse_type_chain(&mut self) -> Result<TypePattern> {
        let mut segments = Vec::new();
        if self.match_token(&Token::DotDot) {
            segments.push(Segment::DeepAny);
            if !self.check(&Token::Word) {
                return Err(self.error_at_current("name pattern segment after '..'"));
            }
        }
        loop {
            let token = self.consume(&Token::Word, "name pattern segment")?;
            segments.push(Segment::from_word(&token.lexeme));
            if self.match_token(&Token::Dot) {
                continue;
            }
            if self.match_token(&Token::DotDot) {
                segments.push(Segment::DeepAny);
                if self.check(&Token::Word) {
                    continue;
                }
            }
            break;
        }
        let mut dims = 0;
        while self.match_token(&Token::LBracket) {
            self.consume(&Token::RBracket, "']'")?;
            dims += 1;
        }
        Ok(TypePattern { segments, dims })
    }

    /// Parameter list, closing parenthesis included.
    fn parse_parameter_clause(&mut self) -> Result<Vec<ParamEntry>> {
        let mut entries = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                if self.match_token(&Token::DotDot) {
                    entries.push(ParamEntry::Ellipsis);
                } else {
                    entries.push(ParamEntry::Type(self.parse_type_chain()?));
                }
                if !self.match_token(&Token::Comma) {
                    break;
                }
            }
        }
        self.consume(&Token::RParen, "')' closing the parameter list")?;
        let ellipsis_count = entries.iter().filter(|e| matches!(e, ParamEntry::Ellipsis)).count();
        if ellipsis_count > 1 {
            return Err(Error::expression(format!(
                "at most one '..' is allowed in a parameter list, found {ellipsis_count} in '{}'",
                self.source
            )));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_call() {
        let node = parse_expression("call(void pkg.Target.foo())").unwrap();
        let ExpressionNode::Call(pattern) = node else {
            panic!("expected call leaf");
        };
        assert_eq!(pattern.return_type, Some(TypePattern {
            segments: vec![Segment::Glob("void".to_string())],
            dims: 0,
        }));
        assert_eq!(pattern.name, Segment::Glob("foo".to_string()));
        assert!(pattern.parameters.is_empty());
        assert_eq!(pattern.declaring_type.segments.len(), 2);
    }

    #[test]
    fn test_parse_boolean_operators_and_aliases() {
        let symbolic = parse_expression("call(* pkg.*.a()) && !within(test..*) || execution(* pkg.*.b())");
        let worded = parse_expression("call(* pkg.*.a()) AND NOT within(test..*) OR execution(* pkg.*.b())");
        assert_eq!(symbolic.unwrap(), worded.unwrap());
    }

    #[test]
    fn test_parse_modifiers_and_annotations() {
        let node = parse_expression("set(public !static @pkg.Audit int pkg.Target.count)").unwrap();
        let ExpressionNode::Set(pattern) = node else {
            panic!("expected set leaf");
        };
        assert_eq!(pattern.modifiers.required, ACC_PUBLIC);
        assert_eq!(pattern.modifiers.forbidden, ACC_STATIC);
        assert_eq!(pattern.annotations, vec!["pkg.Audit".to_string()]);
        assert_eq!(pattern.name, Segment::Glob("count".to_string()));
    }

    #[test]
    fn test_parse_parameter_patterns() {
        let node = parse_expression("execution(* pkg.Target.foo(String, .., byte))").unwrap();
        let ExpressionNode::Execution(pattern) = node else {
            panic!("expected execution leaf");
        };
        assert_eq!(pattern.parameters.len(), 3);
        assert!(matches!(pattern.parameters[1], ParamEntry::Ellipsis));

        let any = parse_expression("execution(* pkg.Target.foo(..))").unwrap();
        let ExpressionNode::Execution(pattern) = any else {
            panic!("expected execution leaf");
        };
        assert_eq!(pattern.parameters, vec![ParamEntry::Ellipsis]);
    }

    #[test]
    fn test_parse_constructor_pattern() {
        let node = parse_expression("call(pkg.Target.new(..))").unwrap();
        let ExpressionNode::Call(pattern) = node else {
            panic!("expected call leaf");
        };
        assert!(pattern.return_type.is_none());
        assert_eq!(pattern.name, Segment::Glob("new".to_string()));
    }

    #[test]
    fn test_parse_array_dims() {
        let node = parse_expression("execution(int[] pkg.Target.table(byte[][]))").unwrap();
        let ExpressionNode::Execution(pattern) = node else {
            panic!("expected execution leaf");
        };
        assert_eq!(pattern.return_type.as_ref().unwrap().dims, 1);
        let ParamEntry::Type(param) = &pattern.parameters[0] else {
            panic!("expected type entry");
        };
        assert_eq!(param.dims, 2);
    }

    #[test]
    fn test_parse_cflow_and_reference() {
        let node =
            parse_expression("execution(* pkg.*.serve(..)) && cflowbelow(execution(* pkg.Gateway.accept(..)))")
                .unwrap();
        assert!(matches!(node, ExpressionNode::And(_, _)));

        let reference = parse_expression("myAspect.txPoints && within(pkg..*)").unwrap();
        let ExpressionNode::And(left, _) = reference else {
            panic!("expected conjunction");
        };
        assert_eq!(*left, ExpressionNode::Reference("myAspect.txPoints".to_string()));
    }

    #[test]
    fn test_malformed_expressions_fail_fast() {
        // unbalanced parens
        assert!(parse_expression("call(void pkg.T.foo()").is_err());
        // unknown leaf keyword
        assert!(parse_expression("grab(void pkg.T.foo())").is_err());
        // invalid modifier token after negation
        assert!(parse_expression("execution(!volatile * pkg.T.foo())").is_err());
        // two ellipses in one parameter list
        assert!(parse_expression("execution(* pkg.T.foo(.., int, ..))").is_err());
        // missing return type on a non-constructor pattern
        assert!(parse_expression("execution(pkg.T.foo())").is_err());
        // member name may not be '..'
        assert!(parse_expression("execution(* pkg..(..))").is_err());
        // empty input
        assert!(parse_expression("   ").is_err());
    }

    #[test]
    fn test_keyword_words_usable_as_names() {
        // 'call' as a package segment still parses as a name
        let node = parse_expression("within(call.handlers..*)").unwrap();
        assert!(matches!(node, ExpressionNode::Within(_)));
    }
}
