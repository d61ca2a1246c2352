// 该文件是 Shanan （山南西风） 项目的一部分。
// src/filter.rs - ROI 过滤条件
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 过滤条件语法:
//!
//! ```text
//! expr  := and ('||' and)*
//! and   := unary ('&&' unary)*
//! unary := '!' unary | '(' expr ')' | field op value
//! field := label | confidence
//! op    := = | == | != | < | <= | > | >=
//! ```
//!
//! `label` 只支持相等比较，值可以是裸词或带引号的字符串。

use std::{fmt, iter::Peekable, str::CharIndices, str::FromStr};

use thiserror::Error;
use tracing::{debug, error};

use crate::{frame::Rect, inference::RoiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

impl CmpOp {
  fn compare<T: PartialOrd + ?Sized>(self, lhs: &T, rhs: &T) -> bool {
    match self {
      CmpOp::Eq => lhs == rhs,
      CmpOp::Ne => lhs != rhs,
      CmpOp::Lt => lhs < rhs,
      CmpOp::Le => lhs <= rhs,
      CmpOp::Gt => lhs > rhs,
      CmpOp::Ge => lhs >= rhs,
    }
  }
}

impl fmt::Display for CmpOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let op = match self {
      CmpOp::Eq => "==",
      CmpOp::Ne => "!=",
      CmpOp::Lt => "<",
      CmpOp::Le => "<=",
      CmpOp::Gt => ">",
      CmpOp::Ge => ">=",
    };
    f.write_str(op)
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
  #[error("位置 {0} 处出现意外字符 '{1}'")]
  UnexpectedChar(usize, char),
  #[error("引号未闭合")]
  UnterminatedQuote,
  #[error("条件意外结束")]
  UnexpectedEnd,
  #[error("意外的符号: {0}")]
  UnexpectedToken(String),
  #[error("未知的字段: {0}")]
  UnknownField(String),
  #[error("字段 {field} 不支持运算符 {op}")]
  UnsupportedOperator { field: &'static str, op: CmpOp },
  #[error("条件嵌套超过 {0} 层")]
  TooDeep(usize),
  #[error("无效的置信度数值: {0}")]
  InvalidNumber(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Word(String),
  Quoted(String),
  Op(CmpOp),
  And,
  Or,
  Not,
  LParen,
  RParen,
}

impl fmt::Display for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Token::Word(w) => write!(f, "{}", w),
      Token::Quoted(s) => write!(f, "\"{}\"", s),
      Token::Op(op) => write!(f, "{}", op),
      Token::And => f.write_str("&&"),
      Token::Or => f.write_str("||"),
      Token::Not => f.write_str("!"),
      Token::LParen => f.write_str("("),
      Token::RParen => f.write_str(")"),
    }
  }
}

fn is_word_char(c: char) -> bool {
  c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | '+')
}

fn next_is(chars: &mut Peekable<CharIndices<'_>>, expected: char) -> bool {
  chars.next_if(|&(_, c)| c == expected).is_some()
}

fn tokenize(input: &str) -> Result<Vec<Token>, FilterError> {
  let mut tokens = Vec::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, c)) = chars.next() {
    let token = match c {
      c if c.is_whitespace() => continue,
      '(' => Token::LParen,
      ')' => Token::RParen,
      '&' if next_is(&mut chars, '&') => Token::And,
      '|' if next_is(&mut chars, '|') => Token::Or,
      '!' if next_is(&mut chars, '=') => Token::Op(CmpOp::Ne),
      '!' => Token::Not,
      '=' => {
        next_is(&mut chars, '=');
        Token::Op(CmpOp::Eq)
      }
      '<' if next_is(&mut chars, '=') => Token::Op(CmpOp::Le),
      '<' => Token::Op(CmpOp::Lt),
      '>' if next_is(&mut chars, '=') => Token::Op(CmpOp::Ge),
      '>' => Token::Op(CmpOp::Gt),
      '"' | '\'' => {
        let mut text = String::new();
        loop {
          match chars.next() {
            Some((_, q)) if q == c => break,
            Some((_, ch)) => text.push(ch),
            None => return Err(FilterError::UnterminatedQuote),
          }
        }
        Token::Quoted(text)
      }
      c if is_word_char(c) => {
        let mut word = String::from(c);
        while let Some((_, ch)) = chars.next_if(|&(_, ch)| is_word_char(ch)) {
          word.push(ch);
        }
        Token::Word(word)
      }
      other => return Err(FilterError::UnexpectedChar(pos, other)),
    };
    tokens.push(token);
  }

  Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
  Label { op: CmpOp, value: String },
  Confidence { op: CmpOp, value: f32 },
  Not(Box<FilterCondition>),
  And(Box<FilterCondition>, Box<FilterCondition>),
  Or(Box<FilterCondition>, Box<FilterCondition>),
}

impl FilterCondition {
  /// 结果不具备的字段一律视为不满足
  pub fn matches<R: RoiResult + ?Sized>(&self, result: &R) -> bool {
    match self {
      FilterCondition::Label { op, value } => result
        .label()
        .is_some_and(|label| op.compare(label, value.as_str())),
      FilterCondition::Confidence { op, value } => result
        .confidence()
        .is_some_and(|confidence| op.compare(&confidence, value)),
      FilterCondition::Not(inner) => !inner.matches(result),
      FilterCondition::And(lhs, rhs) => lhs.matches(result) && rhs.matches(result),
      FilterCondition::Or(lhs, rhs) => lhs.matches(result) || rhs.matches(result),
    }
  }
}

/// `!` 与 `(` 的最大嵌套层数
pub const MAX_FILTER_DEPTH: usize = 64;

struct Parser {
  tokens: Vec<Token>,
  pos: usize,
  depth: usize,
}

impl Parser {
  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn bump(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned();
    self.pos += 1;
    token
  }

  fn parse_or(&mut self) -> Result<FilterCondition, FilterError> {
    let mut lhs = self.parse_and()?;
    while self.peek() == Some(&Token::Or) {
      self.pos += 1;
      let rhs = self.parse_and()?;
      lhs = FilterCondition::Or(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
  }

  fn parse_and(&mut self) -> Result<FilterCondition, FilterError> {
    let mut lhs = self.parse_unary()?;
    while self.peek() == Some(&Token::And) {
      self.pos += 1;
      let rhs = self.parse_unary()?;
      lhs = FilterCondition::And(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
  }

  fn descend(&mut self) -> Result<(), FilterError> {
    if self.depth >= MAX_FILTER_DEPTH {
      return Err(FilterError::TooDeep(MAX_FILTER_DEPTH));
    }
    self.depth += 1;
    Ok(())
  }

  fn parse_unary(&mut self) -> Result<FilterCondition, FilterError> {
    match self.bump() {
      Some(Token::Not) => {
        self.descend()?;
        let inner = self.parse_unary()?;
        self.depth -= 1;
        Ok(FilterCondition::Not(Box::new(inner)))
      }
      Some(Token::LParen) => {
        self.descend()?;
        let inner = self.parse_or()?;
        self.depth -= 1;
        match self.bump() {
          Some(Token::RParen) => Ok(inner),
          Some(other) => Err(FilterError::UnexpectedToken(other.to_string())),
          None => Err(FilterError::UnexpectedEnd),
        }
      }
      Some(Token::Word(field)) => self.parse_comparison(field),
      Some(other) => Err(FilterError::UnexpectedToken(other.to_string())),
      None => Err(FilterError::UnexpectedEnd),
    }
  }

  fn parse_comparison(&mut self, field: String) -> Result<FilterCondition, FilterError> {
    let op = match self.bump() {
      Some(Token::Op(op)) => op,
      Some(other) => return Err(FilterError::UnexpectedToken(other.to_string())),
      None => return Err(FilterError::UnexpectedEnd),
    };
    let value = match self.bump() {
      Some(Token::Word(v)) | Some(Token::Quoted(v)) => v,
      Some(other) => return Err(FilterError::UnexpectedToken(other.to_string())),
      None => return Err(FilterError::UnexpectedEnd),
    };

    match field.as_str() {
      "label" => match op {
        CmpOp::Eq | CmpOp::Ne => Ok(FilterCondition::Label { op, value }),
        _ => Err(FilterError::UnsupportedOperator { field: "label", op }),
      },
      "confidence" => {
        let value = value
          .parse::<f32>()
          .map_err(|_| FilterError::InvalidNumber(value.clone()))?;
        Ok(FilterCondition::Confidence { op, value })
      }
      _ => Err(FilterError::UnknownField(field)),
    }
  }
}

impl FromStr for FilterCondition {
  type Err = FilterError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut parser = Parser {
      tokens: tokenize(s)?,
      pos: 0,
      depth: 0,
    };
    let condition = parser.parse_or()?;
    match parser.bump() {
      None => Ok(condition),
      Some(extra) => Err(FilterError::UnexpectedToken(extra.to_string())),
    }
  }
}

/// 按条件筛选结果的位置，保持结果顺序。空条件返回全部位置，
/// 无法解析的条件记录错误并返回空列表。
pub fn filter_rois<R: RoiResult>(results: &[R], conditions: &str) -> Vec<Rect> {
  if conditions.trim().is_empty() {
    return results.iter().map(|r| *r.location()).collect();
  }

  match conditions.parse::<FilterCondition>() {
    Ok(condition) => {
      debug!("过滤条件: {:?}", condition);
      results
        .iter()
        .filter(|r| condition.matches(*r))
        .map(|r| *r.location())
        .collect()
    }
    Err(e) => {
      error!("过滤条件无效 '{}': {}", conditions, e);
      Vec::new()
    }
  }
}
