use crate::value::Value;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};

/// Host-supplied function callable from scripts by name.
///
/// Receives the evaluated arguments and returns a value or an error
/// message; the evaluator attaches the call site to the message.
pub type NativeFn = fn(&mut NativeContext, &[Value]) -> Result<Value, String>;

/// State natives may touch: program arguments and the I/O streams.
pub struct NativeContext {
    pub args: Vec<String>,
    input: Box<dyn BufRead>,
    output: Box<dyn Write>,
}

impl NativeContext {
    pub fn new(input: Box<dyn BufRead>, output: Box<dyn Write>) -> Self {
        Self {
            args: Vec::new(),
            input,
            output,
        }
    }

    pub fn stdio() -> Self {
        Self::new(Box::new(io::BufReader::new(io::stdin())), Box::new(io::stdout()))
    }

    pub fn set_input(&mut self, input: Box<dyn BufRead>) {
        self.input = input;
    }

    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }

    fn write(&mut self, text: &str) -> Result<(), String> {
        self.output
            .write_all(text.as_bytes())
            .map_err(|err| format!("failed to write output: {}", err))
    }

    /// Next input line without its line terminator, `None` at end of input.
    fn read_line(&mut self) -> Result<Option<String>, String> {
        // Prompts written with print() must be visible before blocking.
        self.flush()
            .map_err(|err| format!("failed to write output: {}", err))?;

        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .map_err(|err| format!("failed to read input: {}", err))?;
        if read == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

/// Per-interpreter table of native functions. Resolved before user
/// functions, so a native shadows a user function of the same name.
#[derive(Clone)]
pub struct NativeRegistry {
    functions: HashMap<String, NativeFn>,
}

impl NativeRegistry {
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Registry with the built-in natives.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register("print", print);
        registry.register("println", println);
        registry.register("read_int", read_int);
        registry.register("read_double", read_double);
        registry.register("read_line", read_line);
        registry.register("len", len);
        registry.register("argc", argc);
        registry.register("argv", argv);
        registry
    }

    /// Add or replace a native, returning the one it replaced.
    pub fn register(&mut self, name: &str, function: NativeFn) -> Option<NativeFn> {
        self.functions.insert(name.to_string(), function)
    }

    pub fn get(&self, name: &str) -> Option<NativeFn> {
        self.functions.get(name).copied()
    }
}

impl Default for NativeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn check_arity(args: &[Value], expected: usize) -> Result<(), String> {
    if args.len() != expected {
        return Err(format!(
            "expected {} argument(s), got {}",
            expected,
            args.len()
        ));
    }
    Ok(())
}

fn print(ctx: &mut NativeContext, args: &[Value]) -> Result<Value, String> {
    for arg in args {
        ctx.write(&arg.to_string())?;
    }
    Ok(Value::Void)
}

fn println(ctx: &mut NativeContext, args: &[Value]) -> Result<Value, String> {
    print(ctx, args)?;
    ctx.write("\n")?;
    Ok(Value::Void)
}

fn read_int(ctx: &mut NativeContext, args: &[Value]) -> Result<Value, String> {
    check_arity(args, 0)?;
    let line = ctx.read_line()?.ok_or("unexpected end of input")?;
    line.trim()
        .parse::<i64>()
        .map(Value::Int)
        .map_err(|_| format!("'{}' is not an int", line.trim()))
}

fn read_double(ctx: &mut NativeContext, args: &[Value]) -> Result<Value, String> {
    check_arity(args, 0)?;
    let line = ctx.read_line()?.ok_or("unexpected end of input")?;
    line.trim()
        .parse::<f64>()
        .map(Value::Double)
        .map_err(|_| format!("'{}' is not a double", line.trim()))
}

// Empty string at end of input.
fn read_line(ctx: &mut NativeContext, args: &[Value]) -> Result<Value, String> {
    check_arity(args, 0)?;
    Ok(Value::String(ctx.read_line()?.unwrap_or_default()))
}

fn len(_ctx: &mut NativeContext, args: &[Value]) -> Result<Value, String> {
    check_arity(args, 1)?;
    match &args[0] {
        Value::Array(items) => Ok(Value::Int(items.len() as i64)),
        Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
        other => Err(format!("not supported for type {}", other.type_name())),
    }
}

fn argc(ctx: &mut NativeContext, args: &[Value]) -> Result<Value, String> {
    check_arity(args, 0)?;
    Ok(Value::Int(ctx.args.len() as i64))
}

fn argv(ctx: &mut NativeContext, args: &[Value]) -> Result<Value, String> {
    check_arity(args, 1)?;
    let Value::Int(index) = args[0] else {
        return Err(format!("index must be an int, found {}", args[0].type_name()));
    };
    usize::try_from(index)
        .ok()
        .and_then(|i| ctx.args.get(i))
        .map(|arg| Value::String(arg.clone()))
        .ok_or_else(|| {
            format!(
                "index {} is out of bounds for {} argument(s)",
                index,
                ctx.args.len()
            )
        })
}
