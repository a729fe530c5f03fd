use cmm::error::{ErrorKind, Span};
use cmm::lexer::{Keyword, Lexer, TokenType};
use pretty_assertions::assert_eq;

fn lex(source: &str) -> (Vec<TokenType>, Vec<String>) {
    let mut lexer = Lexer::new(source);
    let tokens = lexer
        .scan_tokens()
        .unwrap_or_else(|err| panic!("lexing {:?} failed: {}", source, err));
    let warnings = lexer
        .take_warnings()
        .into_iter()
        .map(|warning| warning.message)
        .collect();
    (
        tokens.into_iter().map(|token| token.token_type).collect(),
        warnings,
    )
}

fn token_types(source: &str) -> Vec<TokenType> {
    lex(source).0
}

fn lex_error(source: &str) -> String {
    let error = Lexer::new(source)
        .scan_tokens()
        .expect_err("lexing should fail");
    assert_eq!(error.kind, ErrorKind::LexError);
    error.message
}

#[test]
fn keywords_identifiers_and_booleans() {
    assert_eq!(
        token_types("if else infix string foo_bar true false do"),
        vec![
            TokenType::Keyword(Keyword::If),
            TokenType::Keyword(Keyword::Else),
            TokenType::Keyword(Keyword::Infix),
            TokenType::Keyword(Keyword::String),
            TokenType::Identifier("foo_bar".to_string()),
            TokenType::Boolean(true),
            TokenType::Boolean(false),
            TokenType::Keyword(Keyword::Do),
            TokenType::Eof,
        ]
    );
}

#[test]
fn identifier_with_trailing_underscore_warns() {
    let (tokens, warnings) = lex("tmp_");
    assert_eq!(
        tokens,
        vec![TokenType::Identifier("tmp_".to_string()), TokenType::Eof]
    );
    assert_eq!(warnings, vec!["identifier ends with '_'".to_string()]);
}

#[test]
fn multi_character_operators() {
    assert_eq!(
        token_types("+= <<= >> && || != ! ~ ^ == & |= <"),
        vec![
            TokenType::PlusEqual,
            TokenType::LessLessEqual,
            TokenType::GreaterGreater,
            TokenType::AmpAmp,
            TokenType::PipePipe,
            TokenType::BangEqual,
            TokenType::Bang,
            TokenType::Tilde,
            TokenType::Caret,
            TokenType::EqualEqual,
            TokenType::Amp,
            TokenType::PipeEqual,
            TokenType::Less,
            TokenType::Eof,
        ]
    );
}

#[test]
fn integer_and_hex_literals() {
    assert_eq!(
        token_types("0 42 0x1F 0X10 0xff"),
        vec![
            TokenType::Integer(0),
            TokenType::Integer(42),
            TokenType::Integer(31),
            TokenType::Integer(16),
            TokenType::Integer(255),
            TokenType::Eof,
        ]
    );
}

#[test]
fn decimal_overflow_keeps_value_before_overflowing_digit() {
    let (tokens, warnings) = lex("99999999999999999999 1");
    assert_eq!(
        tokens,
        vec![
            TokenType::Integer(999_999_999_999_999_999),
            TokenType::Integer(1),
            TokenType::Eof,
        ]
    );
    assert_eq!(warnings, vec!["decimal integer literal is too large".to_string()]);
}

#[test]
fn hex_overflow_warns() {
    let (tokens, warnings) = lex("0x1FFFFFFFFFFFFFFFF");
    assert_eq!(
        tokens,
        vec![TokenType::Integer(0x1FFF_FFFF_FFFF_FFFF), TokenType::Eof]
    );
    assert_eq!(
        warnings,
        vec!["hexadecimal integer literal is too large".to_string()]
    );
}

#[test]
fn hex_prefix_without_digits_is_an_error() {
    assert_eq!(lex_error("0x"), "hexadecimal literal has no digits");
    assert_eq!(lex_error("0xg"), "hexadecimal literal has no digits");
}

#[test]
fn floating_literals() {
    assert_eq!(
        token_types("3.25 7. 0.5"),
        vec![
            TokenType::Double(3.25),
            TokenType::Double(7.0),
            TokenType::Double(0.5),
            TokenType::Eof,
        ]
    );
}

#[test]
fn long_fraction_is_truncated_to_five_digits() {
    let (tokens, warnings) = lex("3.123456789");
    assert_eq!(
        tokens,
        vec![TokenType::Double(3.0 + 12345.0 / 100000.0), TokenType::Eof]
    );
    assert_eq!(
        warnings,
        vec!["long floating number may lose precision".to_string()]
    );

    // Exactly five digits is still exact.
    let (_, warnings) = lex("1.12345");
    assert!(warnings.is_empty());
}

#[test]
fn string_escapes_are_decoded() {
    assert_eq!(
        token_types(r#""a\tb\n" "\"q\"" "\\""#),
        vec![
            TokenType::String("a\tb\n".to_string()),
            TokenType::String("\"q\"".to_string()),
            TokenType::String("\\".to_string()),
            TokenType::Eof,
        ]
    );
}

#[test]
fn unknown_string_escape_is_kept_verbatim() {
    let (tokens, warnings) = lex(r#""\q""#);
    assert_eq!(
        tokens,
        vec![TokenType::String("\\q".to_string()), TokenType::Eof]
    );
    assert_eq!(
        warnings,
        vec!["\\q is an invalid escaping sequence in string literal".to_string()]
    );
}

#[test]
fn char_literals_are_integers() {
    assert_eq!(
        token_types(r"'a' '\n' '\'' '\0'"),
        vec![
            TokenType::Integer(97),
            TokenType::Integer(10),
            TokenType::Integer(39),
            TokenType::Integer(0),
            TokenType::Eof,
        ]
    );
}

#[test]
fn char_literal_warnings() {
    let (tokens, warnings) = lex(r"'' '\q' 'ab'");
    assert_eq!(
        tokens,
        vec![
            TokenType::Integer(0),
            TokenType::Integer('q' as i64),
            TokenType::Integer('a' as i64),
            TokenType::Eof,
        ]
    );
    assert_eq!(
        warnings,
        vec![
            "no character in single quote, treat as '\\0'".to_string(),
            "\\q is an invalid escaping character".to_string(),
            "extra character in single quote".to_string(),
        ]
    );
}

#[test]
fn unterminated_literals_are_errors() {
    assert_eq!(lex_error("'a"), "end of file in char constant");
    assert_eq!(lex_error("'"), "end of file in char constant");
    assert_eq!(lex_error("\"abc"), "end of file in string constant");
    assert_eq!(lex_error("\"abc\\"), "end of file in string constant after \\");
}

#[test]
fn comments_are_skipped() {
    assert_eq!(
        token_types("1 // rest of line\n2 /* block\n comment */ 3"),
        vec![
            TokenType::Integer(1),
            TokenType::Integer(2),
            TokenType::Integer(3),
            TokenType::Eof,
        ]
    );
}

#[test]
fn nested_block_comment_warns_and_is_fully_consumed() {
    let (tokens, warnings) = lex("/* a /* b */ c */ 4");
    assert_eq!(tokens, vec![TokenType::Integer(4), TokenType::Eof]);
    assert_eq!(warnings, vec!["block comments can't be nested".to_string()]);
}

#[test]
fn unterminated_block_comment_is_an_error() {
    assert_eq!(lex_error("1 /* never closed"), "unterminated /* comment");
}

#[test]
fn long_comment_runs_do_not_recurse() {
    let source = "// x\n".repeat(100_000) + "7";
    assert_eq!(token_types(&source), vec![TokenType::Integer(7), TokenType::Eof]);
}

#[test]
fn infix_operator_tokens() {
    assert_eq!(
        token_types("`+` @@ #x $%$ ?"),
        vec![
            TokenType::InfixOp("`+`".to_string()),
            TokenType::InfixOp("@@".to_string()),
            TokenType::InfixOp("#".to_string()),
            TokenType::Identifier("x".to_string()),
            TokenType::InfixOp("$%$".to_string()),
            TokenType::InfixOp("?".to_string()),
            TokenType::Eof,
        ]
    );
}

#[test]
fn infix_operator_stops_at_repeated_lead_character() {
    assert_eq!(
        token_types("a `*``-` b"),
        vec![
            TokenType::Identifier("a".to_string()),
            TokenType::InfixOp("`*`".to_string()),
            TokenType::InfixOp("`-`".to_string()),
            TokenType::Identifier("b".to_string()),
            TokenType::Eof,
        ]
    );
}

#[test]
fn unknown_character_is_an_error() {
    assert_eq!(lex_error("1 . 2"), "unknown character '.'");
}

#[test]
fn spans_are_character_offsets() {
    let tokens = Lexer::new("\"é\" xy")
        .scan_tokens()
        .expect("source should lex");
    assert_eq!(tokens[0].span, Span::new(0, 3));
    assert_eq!(tokens[1].span, Span::new(4, 6));
    assert_eq!(tokens[1].lexeme, "xy");
}

#[test]
fn next_token_keeps_returning_eof() {
    let mut lexer = Lexer::new("x");
    assert_eq!(lexer.next_token().token_type, TokenType::Identifier("x".to_string()));
    assert!(lexer.next_token().is_eof());
    assert!(lexer.next_token().is_eof());
}
