//! `.rig` file parser built on `nom`.
//!
//! Transforms raw `.rig` text into a validated AST through
//! lexing, parsing, and static analysis phases.

pub mod ast;
pub mod lexer;
pub mod validator;

use std::collections::BTreeMap;

use rigging_common::error::{Result, RiggingError};

use self::ast::{OutputDecl, ParamDecl, ResourceDecl, StackFile};
use self::lexer::Token;
use crate::expr::{Expr, Template};

/// Cursor into a token stream for recursive-descent parsing.
struct TokenCursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> TokenCursor<'a> {
    const fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.advance() {
            Some(Token::Identifier(s)) => Ok(s.clone()),
            other => Err(parse_err(format!("expected identifier, got {other:?}"))),
        }
    }

    fn expect_token(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(tok) if tok == expected => Ok(()),
            other => Err(parse_err(format!("expected {expected:?}, got {other:?}"))),
        }
    }

    const fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}

const fn parse_err(message: String) -> RiggingError {
    RiggingError::Parse { message }
}

fn skip_optional_comma(cursor: &mut TokenCursor<'_>) {
    let _ = cursor.eat(&Token::Comma);
}

/// Parses a `.rig` file from its source text.
///
/// # Errors
///
/// Returns an error if the input contains syntax errors or fails validation.
pub fn parse_stack(input: &str) -> Result<StackFile> {
    tracing::debug!("parsing .rig input");
    let tokens = lexer::tokenize(input)?;
    let mut cursor = TokenCursor::new(&tokens);
    let file = parse_file(&mut cursor)?;
    validator::validate(&file)?;
    Ok(file)
}

fn parse_file(cursor: &mut TokenCursor<'_>) -> Result<StackFile> {
    let mut file = StackFile::default();

    while let Some(tok) = cursor.peek() {
        match tok {
            Token::Param => file.params.push(parse_param(cursor)?),
            Token::Resource => file.resources.push(parse_resource(cursor)?),
            Token::Output => file.outputs.push(parse_output(cursor)?),
            other => {
                return Err(parse_err(format!(
                    "expected PARAM, RESOURCE, or OUTPUT at top level, got {other:?}"
                )));
            }
        }
    }

    Ok(file)
}

fn parse_param(cursor: &mut TokenCursor<'_>) -> Result<ParamDecl> {
    cursor.expect_token(&Token::Param)?;
    let name = cursor.expect_identifier()?;
    let secret = cursor.eat(&Token::Secret);
    let default = if cursor.eat(&Token::Equals) {
        Some(parse_expr(cursor)?)
    } else {
        None
    };
    Ok(ParamDecl {
        name,
        secret,
        default,
    })
}

fn parse_resource(cursor: &mut TokenCursor<'_>) -> Result<ResourceDecl> {
    cursor.expect_token(&Token::Resource)?;
    let kind = cursor.expect_identifier()?.parse()?;
    let name = cursor.expect_identifier()?;

    let depends_on = if cursor.eat(&Token::DependsOn) {
        parse_name_list(cursor)?
    } else {
        Vec::new()
    };

    let properties = parse_block(cursor, &format!("RESOURCE {name}"))?;
    Ok(ResourceDecl {
        kind,
        name,
        depends_on,
        properties,
    })
}

fn parse_output(cursor: &mut TokenCursor<'_>) -> Result<OutputDecl> {
    cursor.expect_token(&Token::Output)?;
    let secret = cursor.eat(&Token::Secret);
    let name = cursor.expect_identifier()?;
    cursor.expect_token(&Token::Equals)?;
    let value = parse_expr(cursor)?;
    Ok(OutputDecl {
        name,
        secret,
        value,
    })
}

fn parse_name_list(cursor: &mut TokenCursor<'_>) -> Result<Vec<String>> {
    cursor.expect_token(&Token::BracketOpen)?;
    let mut names = Vec::new();

    while cursor.peek() != Some(&Token::BracketClose) {
        if cursor.at_end() {
            return Err(parse_err("unexpected end of input inside DEPENDS_ON".into()));
        }
        names.push(cursor.expect_identifier()?);
        skip_optional_comma(cursor);
    }

    cursor.expect_token(&Token::BracketClose)?;
    Ok(names)
}

/// Parses `{ key = expr ... }`, rejecting repeated keys.
fn parse_block(cursor: &mut TokenCursor<'_>, context: &str) -> Result<BTreeMap<String, Expr>> {
    cursor.expect_token(&Token::BraceOpen)?;
    let mut entries = BTreeMap::new();

    while cursor.peek() != Some(&Token::BraceClose) {
        if cursor.at_end() {
            return Err(parse_err(format!(
                "unexpected end of input inside {context} block"
            )));
        }
        let key = match cursor.advance() {
            Some(Token::Identifier(s) | Token::StringLiteral(s)) => s.clone(),
            other => return Err(parse_err(format!("expected key, got {other:?}"))),
        };
        cursor.expect_token(&Token::Equals)?;
        let value = parse_expr(cursor)?;
        if entries.insert(key.clone(), value).is_some() {
            return Err(parse_err(format!("duplicate key \"{key}\" in {context}")));
        }
        skip_optional_comma(cursor);
    }

    cursor.expect_token(&Token::BraceClose)?;
    Ok(entries)
}

fn parse_expr(cursor: &mut TokenCursor<'_>) -> Result<Expr> {
    match cursor.peek() {
        Some(Token::BracketOpen) => parse_list(cursor),
        Some(Token::BraceOpen) => Ok(Expr::Map(parse_block(cursor, "map")?)),
        _ => match cursor.advance() {
            Some(Token::StringLiteral(raw)) => Template::parse(raw)
                .map(Expr::Template)
                .map_err(parse_err),
            Some(Token::Integer(n)) => Ok(Expr::Integer(*n)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::Secret) => Ok(Expr::Secret(Box::new(parse_expr(cursor)?))),
            other => Err(parse_err(format!("expected value, got {other:?}"))),
        },
    }
}

fn parse_list(cursor: &mut TokenCursor<'_>) -> Result<Expr> {
    cursor.expect_token(&Token::BracketOpen)?;
    let mut items = Vec::new();

    while cursor.peek() != Some(&Token::BracketClose) {
        if cursor.at_end() {
            return Err(parse_err("unexpected end of input inside list".into()));
        }
        items.push(parse_expr(cursor)?);
        skip_optional_comma(cursor);
    }

    cursor.expect_token(&Token::BracketClose)?;
    Ok(Expr::List(items))
}

#[cfg(test)]
mod tests {
    use rigging_common::types::ResourceKind;

    use super::*;
    use crate::expr::Reference;

    #[test]
    fn parse_empty_input() {
        let file = parse_stack("").expect("should parse empty input");
        assert!(file.params.is_empty());
        assert!(file.resources.is_empty());
        assert!(file.outputs.is_empty());
    }

    #[test]
    fn parse_params() {
        let input = r#"PARAM token SECRET
PARAM nodeCount = 2
PARAM region = "fra1""#;
        let file = parse_stack(input).expect("should parse");
        assert_eq!(file.params.len(), 3);
        assert!(file.params[0].secret);
        assert!(file.params[0].default.is_none());
        assert_eq!(file.params[1].default, Some(Expr::Integer(2)));
        assert_eq!(file.params[2].default, Some(Expr::text("fra1")));
    }

    #[test]
    fn parse_minimal_resource() {
        let input = r#"RESOURCE Namespace kagent-ns {
    name = "kagent"
}"#;
        let file = parse_stack(input).expect("should parse");
        let ns = &file.resources[0];
        assert_eq!(ns.kind, ResourceKind::Namespace);
        assert_eq!(ns.name, "kagent-ns");
        assert_eq!(ns.properties.get("name"), Some(&Expr::text("kagent")));
    }

    #[test]
    fn parse_resource_with_depends_on_and_nested_values() {
        let input = r#"RESOURCE HelmRelease kagent DEPENDS_ON [kagent-crds, kagent-openai] {
    chart = "oci://ghcr.io/kagent-dev/kagent/helm/kagent"
    namespace = "${kagent-ns.name}"
    values = {
        providers = { default = "openAI" }
        ui = { service = { type = "LoadBalancer", ports = { port = 8080 } } }
        "app.kubernetes.io/name" = "kagent"
        replicas = [1, 2,]
        enabled = true
    }
}"#;
        let file = parse_stack(input).expect("should parse");
        let rel = &file.resources[0];
        assert_eq!(rel.depends_on, vec!["kagent-crds", "kagent-openai"]);
        let Some(Expr::Map(values)) = rel.properties.get("values") else {
            panic!("values should be a map");
        };
        assert!(values.contains_key("app.kubernetes.io/name"));
        assert_eq!(values.get("enabled"), Some(&Expr::Bool(true)));
        assert_eq!(
            values.get("replicas"),
            Some(&Expr::List(vec![Expr::Integer(1), Expr::Integer(2)]))
        );
        let Some(Expr::Template(ns)) = rel.properties.get("namespace") else {
            panic!("namespace should be a string");
        };
        assert_eq!(
            ns.sole_reference(),
            Some(&Reference::Attribute {
                resource: "kagent-ns".into(),
                path: vec!["name".into()],
            })
        );
    }

    #[test]
    fn parse_outputs() {
        let input = r#"PARAM token SECRET
RESOURCE ModelKey key { name = "workshop", token = "${config.token}" }
OUTPUT keyUuid = "${key.uuid}"
OUTPUT SECRET llmApiKey = "${key.secret_key}""#;
        let file = parse_stack(input).expect("should parse");
        assert_eq!(file.outputs.len(), 2);
        assert!(!file.outputs[0].secret);
        assert!(file.outputs[1].secret);
        assert_eq!(file.outputs[1].name, "llmApiKey");
    }

    #[test]
    fn parse_secret_literal() {
        let input = r#"PARAM grafanaPassword = SECRET "workshop-admin""#;
        let file = parse_stack(input).expect("should parse");
        assert_eq!(
            file.params[0].default,
            Some(Expr::Secret(Box::new(Expr::text("workshop-admin"))))
        );
    }

    #[test]
    fn parse_error_unknown_kind() {
        let err = parse_stack("RESOURCE Pod p { }").unwrap_err();
        assert!(err.to_string().contains("unknown resource kind"), "got: {err}");
    }

    #[test]
    fn parse_error_missing_brace() {
        let input = r#"RESOURCE Namespace x {
    name = "x"
"#;
        assert!(parse_stack(input).is_err());
    }

    #[test]
    fn parse_error_duplicate_key() {
        let input = r#"RESOURCE Namespace x { name = "a" name = "b" }"#;
        let err = parse_stack(input).unwrap_err();
        assert!(err.to_string().contains("duplicate key"), "got: {err}");
    }

    #[test]
    fn parse_error_malformed_interpolation() {
        let input = r#"RESOURCE Namespace x { name = "${x" }"#;
        let err = parse_stack(input).unwrap_err();
        assert!(err.to_string().contains("unterminated"), "got: {err}");
    }

    #[test]
    fn parse_error_stray_top_level_token() {
        assert!(parse_stack("name = \"x\"").is_err());
    }

    #[test]
    fn parse_comments_ignored() {
        let input = r#"// chapter header
RESOURCE Namespace apps {
    // sample workloads
    name = "apps" // trailing
}"#;
        let file = parse_stack(input).expect("should parse with comments");
        assert_eq!(file.resources[0].name, "apps");
    }
}
