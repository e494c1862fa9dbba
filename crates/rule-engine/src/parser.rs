//! 公式解析器
//!
//! 将公式文本解析为表达式树。支持数字、布尔字面量、点号分隔的
//! 规则引用、一元负号、四则运算、比较运算和括号。
//!
//! 运算优先级（低到高）：比较 < 加减 < 乘除 < 一元负号。

use crate::error::{Result, RuleError};

/// 表达式节点
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Boolean(bool),
    /// 对规则或输入变量的引用
    Reference(String),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// 二元运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Expr {
    /// 收集表达式中出现的所有引用名（按出现顺序，不去重）
    pub fn collect_references(&self, out: &mut Vec<String>) {
        match self {
            Expr::Number(_) | Expr::Boolean(_) => {}
            Expr::Reference(name) => out.push(name.clone()),
            Expr::Neg(inner) => inner.collect_references(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_references(out);
                rhs.collect_references(out);
            }
        }
    }
}

/// 词法单元
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// 解析公式文本为表达式树
///
/// 解析完成后必须恰好消费完所有输入，残留内容视为解析错误。
pub fn parse_expression(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.comparison()?;

    if parser.pos < parser.tokens.len() {
        return Err(RuleError::ParseError(format!(
            "表达式 '{}' 存在无法解析的残留内容",
            source
        )));
    }

    Ok(expr)
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    return Err(RuleError::ParseError(format!(
                        "非法字符 '!'（位于 '{}'）",
                        source
                    )));
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '0'..='9' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value: f64 = literal.parse().map_err(|_| {
                    RuleError::ParseError(format!("无效的数字字面量: '{}'", literal))
                })?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                tokens.push(Token::Ident(read_identifier(&mut chars)));
            }
            other => {
                return Err(RuleError::ParseError(format!(
                    "非法字符 '{}'（位于 '{}'）",
                    other, source
                )));
            }
        }
    }

    Ok(tokens)
}

/// 读取一个标识符，支持点号分隔的多段引用（如 "salaire.net"）
///
/// 点号前后允许空格，但点号之后必须跟随下一段标识符。
fn read_identifier(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut segments = vec![read_segment(chars)];

    loop {
        // 向前探测 "空格* . 空格* 标识符" 模式，不匹配则回退
        let mut lookahead = chars.clone();
        while lookahead.peek() == Some(&' ') {
            lookahead.next();
        }
        if lookahead.peek() != Some(&'.') {
            break;
        }
        lookahead.next();
        while lookahead.peek() == Some(&' ') {
            lookahead.next();
        }
        match lookahead.peek() {
            Some(&c) if c.is_alphabetic() || c == '_' => {
                *chars = lookahead;
                segments.push(read_segment(chars));
            }
            _ => break,
        }
    }

    segments.join(".")
}

fn read_segment(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut segment = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            segment.push(c);
            chars.next();
        } else {
            break;
        }
    }
    segment
}

/// 最大嵌套深度（括号、一元负号链）
///
/// 解析器是递归下降实现，深度必须有上限，否则攻击者可以用深层
/// 嵌套的输入耗尽调用栈使进程崩溃。上限取值与 serde_json 的
/// 递归深度限制一致。
const MAX_DEPTH: usize = 128;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(RuleError::ParseError(format!(
                "表达式嵌套过深（超过 {} 层）",
                MAX_DEPTH
            )));
        }
        Ok(())
    }

    fn exit(&mut self) {
        self.depth -= 1;
    }

    /// 比较层：最多一个比较运算符（非结合）
    fn comparison(&mut self) -> Result<Expr> {
        let lhs = self.additive()?;

        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            _ => return Ok(lhs),
        };
        self.advance();

        let rhs = self.additive()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut expr = self.multiplicative()?;

        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.multiplicative()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }

        Ok(expr)
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut expr = self.unary()?;

        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.unary()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }

        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Minus) {
            self.advance();
            self.enter()?;
            let inner = self.unary();
            self.exit();
            return Ok(Expr::Neg(Box::new(inner?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Boolean(true)),
                "false" => Ok(Expr::Boolean(false)),
                _ => Ok(Expr::Reference(name)),
            },
            Some(Token::LParen) => {
                self.enter()?;
                let expr = self.comparison();
                self.exit();
                let expr = expr?;
                match self.advance() {
                    Some(Token::RParen) => Ok(expr),
                    _ => Err(RuleError::ParseError("括号未闭合".to_string())),
                }
            }
            Some(other) => Err(RuleError::ParseError(format!(
                "意外的词法单元: {:?}",
                other
            ))),
            None => Err(RuleError::ParseError("表达式意外结束".to_string())),
        }
    }
}
