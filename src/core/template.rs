//! # Token Renderer Module / 模板渲染模块
//!
//! Parses `{token}` templates used in backend argv lists and env values, and
//! renders them for a single execution unit. Templates are parsed once when
//! the plan is loaded, so unknown tokens and unbalanced braces never reach the
//! execution stage.
//!
//! 解析后端 argv 列表和环境变量中使用的 `{token}` 模板，并为单个执行单元渲染。
//! 模板在加载计划时解析一次，因此未知标记和不匹配的花括号不会进入执行阶段。
//!
//! ## Quoting / 引用规则
//!
//! An argv element that consists of exactly one token receives the raw value,
//! since it is passed to the child as a discrete argument. When a token is
//! embedded in an element whose literal text contains whitespace (for example
//! `sh -c "cat {input0} > {output0}"`), the element is a shell fragment and
//! each substituted value is shell-quoted. Env values are always literal.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::error::TemplateError;
use crate::core::tensor::DType;

/// A recognized template token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Chip,
    Backend,
    Case,
    Dtype,
    Dtypes,
    Shape,
    Shapes,
    Input(usize),
    Inputs,
    Output(usize),
    Outputs,
    Workdir,
}

impl Token {
    fn parse(name: &str) -> Option<Token> {
        let token = match name {
            "chip" => Token::Chip,
            "backend" => Token::Backend,
            "case" => Token::Case,
            "dtype" => Token::Dtype,
            "dtypes" => Token::Dtypes,
            "shape" => Token::Shape,
            "shapes" => Token::Shapes,
            "inputs" => Token::Inputs,
            "outputs" => Token::Outputs,
            "workdir" => Token::Workdir,
            other => {
                if let Some(idx) = other.strip_prefix("input") {
                    return parse_index(idx).map(Token::Input);
                }
                if let Some(idx) = other.strip_prefix("output") {
                    return parse_index(idx).map(Token::Output);
                }
                return None;
            }
        };
        Some(token)
    }
}

fn parse_index(digits: &str) -> Option<usize> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Chip => f.write_str("chip"),
            Token::Backend => f.write_str("backend"),
            Token::Case => f.write_str("case"),
            Token::Dtype => f.write_str("dtype"),
            Token::Dtypes => f.write_str("dtypes"),
            Token::Shape => f.write_str("shape"),
            Token::Shapes => f.write_str("shapes"),
            Token::Input(n) => write!(f, "input{n}"),
            Token::Inputs => f.write_str("inputs"),
            Token::Output(n) => write!(f, "output{n}"),
            Token::Outputs => f.write_str("outputs"),
            Token::Workdir => f.write_str("workdir"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(Token),
}

/// How substituted values are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quoting {
    /// Rendering an argv element.
    Argv,
    /// Rendering an env value; substitution is literal.
    Literal,
}

/// A parsed template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

/// Everything a template may refer to for one execution unit.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub chip: &'a str,
    pub backend: &'a str,
    pub case: &'a str,
    pub dtypes: &'a [DType],
    pub input_shapes: &'a [Vec<usize>],
    pub output_shapes: &'a [Vec<usize>],
    pub inputs: &'a [PathBuf],
    pub outputs: &'a [PathBuf],
    pub workdir: &'a Path,
}

impl Template {
    /// Parses a template. `{{` and `}}` are literal braces.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => {
                    return Err(TemplateError::UnmatchedClose {
                        template: source.to_string(),
                    });
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        name.push(inner);
                    }
                    if !closed {
                        return Err(TemplateError::Unterminated {
                            template: source.to_string(),
                        });
                    }
                    let token = Token::parse(name.trim()).ok_or_else(|| TemplateError::UnknownToken {
                        token: name.clone(),
                        template: source.to_string(),
                    })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Token(token));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// A template that renders to `text` unchanged.
    pub fn literal(text: &str) -> Self {
        let segments = if text.is_empty() {
            Vec::new()
        } else {
            vec![Segment::Literal(text.to_string())]
        };
        Self {
            source: text.replace('{', "{{").replace('}', "}}"),
            segments,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Token(token) => Some(*token),
            Segment::Literal(_) => None,
        })
    }

    /// Checks token use against a case's arity and dtypes.
    pub fn check(&self, inputs: usize, outputs: usize, dtypes: &[DType]) -> Result<(), TemplateError> {
        for token in self.tokens() {
            match token {
                Token::Input(n) if n >= inputs => {
                    return Err(TemplateError::IndexOutOfRange {
                        token: token.to_string(),
                        available: inputs,
                    });
                }
                Token::Output(n) if n >= outputs => {
                    return Err(TemplateError::IndexOutOfRange {
                        token: token.to_string(),
                        available: outputs,
                    });
                }
                Token::Dtype => {
                    single_dtype(dtypes)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Renders the template for one unit.
    pub fn render(&self, ctx: &RenderContext<'_>, quoting: Quoting) -> Result<String, TemplateError> {
        let quote_values = quoting == Quoting::Argv && self.is_shell_fragment();
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Token(token) => {
                    let value = token_value(*token, ctx)?;
                    if quote_values {
                        let quoted = shlex::try_quote(&value).map_err(|e| TemplateError::Unquotable {
                            token: token.to_string(),
                            reason: e.to_string(),
                        })?;
                        out.push_str(&quoted);
                    } else {
                        out.push_str(&value);
                    }
                }
            }
        }
        Ok(out)
    }

    fn is_shell_fragment(&self) -> bool {
        self.segments.iter().any(|segment| match segment {
            Segment::Literal(text) => text.chars().any(char::is_whitespace),
            Segment::Token(_) => false,
        })
    }
}

fn single_dtype(dtypes: &[DType]) -> Result<DType, TemplateError> {
    let mut distinct: Vec<DType> = Vec::new();
    for dtype in dtypes {
        if !distinct.contains(dtype) {
            distinct.push(*dtype);
        }
    }
    match distinct.as_slice() {
        [only] => Ok(*only),
        _ => Err(TemplateError::AmbiguousDtype {
            dtypes: if distinct.is_empty() {
                "none".to_string()
            } else {
                join_dtypes(&distinct)
            },
        }),
    }
}

fn join_dtypes(dtypes: &[DType]) -> String {
    dtypes.iter().map(|d| d.as_str()).collect::<Vec<_>>().join(",")
}

fn dims(shape: &[usize]) -> String {
    shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("x")
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// `1x4,1x4;1x4`: input shapes, a semicolon, then output shapes.
pub fn flat_shape(inputs: &[Vec<usize>], outputs: &[Vec<usize>]) -> String {
    let side = |shapes: &[Vec<usize>]| shapes.iter().map(|s| dims(s)).collect::<Vec<_>>().join(",");
    format!("{};{}", side(inputs), side(outputs))
}

/// `{"inputs":[[1,4]],"outputs":[[1,4]]}`.
pub fn structured_shape(inputs: &[Vec<usize>], outputs: &[Vec<usize>]) -> String {
    serde_json::json!({ "inputs": inputs, "outputs": outputs }).to_string()
}

fn token_value(token: Token, ctx: &RenderContext<'_>) -> Result<String, TemplateError> {
    let out_of_range = |available: usize| TemplateError::IndexOutOfRange {
        token: token.to_string(),
        available,
    };
    let value = match token {
        Token::Chip => ctx.chip.to_string(),
        Token::Backend => ctx.backend.to_string(),
        Token::Case => ctx.case.to_string(),
        Token::Dtype => single_dtype(ctx.dtypes)?.to_string(),
        Token::Dtypes => join_dtypes(ctx.dtypes),
        Token::Shape => flat_shape(ctx.input_shapes, ctx.output_shapes),
        Token::Shapes => structured_shape(ctx.input_shapes, ctx.output_shapes),
        Token::Input(n) => ctx
            .inputs
            .get(n)
            .ok_or_else(|| out_of_range(ctx.inputs.len()))?
            .display()
            .to_string(),
        Token::Inputs => join_paths(ctx.inputs),
        Token::Output(n) => ctx
            .outputs
            .get(n)
            .ok_or_else(|| out_of_range(ctx.outputs.len()))?
            .display()
            .to_string(),
        Token::Outputs => join_paths(ctx.outputs),
        Token::Workdir => ctx.workdir.display().to_string(),
    };
    Ok(value)
}

/// Renders a whole argv list.
pub fn render_argv(argv: &[Template], ctx: &RenderContext<'_>) -> Result<Vec<String>, TemplateError> {
    argv.iter().map(|part| part.render(ctx, Quoting::Argv)).collect()
}
