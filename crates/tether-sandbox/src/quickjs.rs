//! QuickJS-backed [`Interpreter`].
//!
//! One runtime and one full context per engine. Scripts run in sloppy global
//! mode so top-level declarations and bare assignments land in the shared
//! namespace and stay visible to later directives.

use crate::capability::ModulePolicy;
use crate::error::{Frame, SandboxError, ScriptError};
use crate::interpreter::{Binding, Evaluation, Interpreter, ScriptValue};
use crate::modules::ModuleRegistry;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rquickjs::context::EvalOptions;
use rquickjs::function::Rest;
use rquickjs::{Context, Ctx, FromJs, Function, Module, Object, Persistent, Runtime, Value};
use serde_json::Value as Json;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

/// File name prefix for source compiled by the interpreter itself. Frames
/// under it are dropped from tracebacks.
const INTERNAL_SOURCE: &str = "<sandbox>";

/// Builds `require` from the two native hooks. Globals it needs are captured
/// up front so removing them from the namespace does not break imports.
const REQUIRE_SHIM: &str = r#"
export default function (check, compile) {
    const cache = Object.create(null);
    const ErrorType = Error;
    const toName = String;
    return function require(name) {
        name = toName(name);
        const denied = check(name);
        if (denied) {
            const error = new ErrorType(denied.message);
            error.name = denied.kind;
            throw error;
        }
        if (!(name in cache)) {
            const module = { exports: {} };
            compile(name)(module, module.exports, require);
            cache[name] = module;
        }
        return cache[name].exports;
    };
}
"#;

/// Returns `[type_name, repr]` for values without a JSON form.
const INSPECT: &str = r#"
export default function (value) {
    const kind = typeof value;
    if (kind === 'function') {
        return ['function', '<function ' + (value.name || 'anonymous') + '>'];
    }
    if (kind === 'symbol') {
        return ['symbol', value.toString()];
    }
    if (kind === 'bigint') {
        return ['bigint', value.toString() + 'n'];
    }
    if (kind === 'object' && value !== null) {
        const ctor = value.constructor;
        const name = (ctor && typeof ctor.name === 'string' && ctor.name) || 'Object';
        return [name, '<' + name + ' object>'];
    }
    return [kind, '' + value];
}
"#;

/// Returns the type name of the first part of a value that has no plain
/// data form, or null. Only strings, numbers, booleans, null, arrays and
/// plain objects pass; `undefined` members, class instances (`Set`, `Map`,
/// `Date`, ...) and cycles do not.
const UNSUPPORTED: &str = r#"
const getPrototypeOf = Object.getPrototypeOf;
const keys = Object.keys;
const isArray = Array.isArray;
const plainObject = Object.prototype;
const plainArray = Array.prototype;

function typeName(value) {
    const kind = typeof value;
    if (kind !== 'object') {
        return kind;
    }
    const ctor = value.constructor;
    return (ctor && typeof ctor.name === 'string' && ctor.name) || 'Object';
}

export default function (root) {
    const path = [];
    function walk(value) {
        const kind = typeof value;
        if (value === null || kind === 'string' || kind === 'number' || kind === 'boolean') {
            return null;
        }
        if (kind !== 'object') {
            return typeName(value);
        }
        const array = isArray(value);
        const proto = getPrototypeOf(value);
        if (array ? proto !== plainArray : proto !== plainObject && proto !== null) {
            return typeName(value);
        }
        for (let i = 0; i < path.length; i++) {
            if (path[i] === value) {
                return typeName(value);
            }
        }
        path[path.length] = value;
        let found = null;
        if (array) {
            for (let i = 0; found === null && i < value.length; i++) {
                found = walk(value[i]);
            }
        } else {
            const names = keys(value);
            for (let i = 0; found === null && i < names.length; i++) {
                found = walk(value[names[i]]);
            }
        }
        path.length = path.length - 1;
        return found;
    }
    return walk(root);
}
"#;

/// Helpers compiled once at startup, so later edits to the namespace cannot
/// reach them.
struct Helpers {
    inspect: Persistent<Function<'static>>,
    unsupported: Persistent<Function<'static>>,
}

impl Helpers {
    fn new(ctx: &Ctx<'_>) -> Result<Self, ScriptError> {
        let inspect: Function =
            eval_internal(ctx, "inspect", INSPECT).map_err(|e| caught(ctx, e))?;
        let unsupported: Function =
            eval_internal(ctx, "unsupported", UNSUPPORTED).map_err(|e| caught(ctx, e))?;
        Ok(Self {
            inspect: Persistent::save(ctx, inspect),
            unsupported: Persistent::save(ctx, unsupported),
        })
    }

    /// `(type_name, repr)` of a value.
    fn inspect<'js>(
        &self,
        ctx: &Ctx<'js>,
        value: Value<'js>,
    ) -> Result<(String, String), ScriptError> {
        let parts: Vec<String> = call_helper(ctx, &self.inspect, value)?;
        let mut parts = parts.into_iter();
        Ok((
            parts.next().unwrap_or_else(|| "unknown".to_string()),
            parts.next().unwrap_or_default(),
        ))
    }

    /// Type name of the first part of `value` with no data form.
    fn unsupported<'js>(
        &self,
        ctx: &Ctx<'js>,
        value: Value<'js>,
    ) -> Result<Option<String>, ScriptError> {
        call_helper(ctx, &self.unsupported, value)
    }
}

fn call_helper<'js, R: FromJs<'js>>(
    ctx: &Ctx<'js>,
    helper: &Persistent<Function<'static>>,
    value: Value<'js>,
) -> Result<R, ScriptError> {
    let function = helper.clone().restore(ctx).map_err(|e| caught(ctx, e))?;
    function.call((value,)).map_err(|e| caught(ctx, e))
}

/// JavaScript interpreter embedding QuickJS.
pub struct QuickJs {
    // Dropped before the runtime.
    helpers: Helpers,
    runtime: Runtime,
    context: Context,
    rng: Arc<Mutex<StdRng>>,
}

impl QuickJs {
    /// Create an interpreter whose `require` consults `policy` and loads
    /// from `modules`.
    pub fn new(policy: ModulePolicy, modules: ModuleRegistry) -> Result<Self, SandboxError> {
        let runtime = Runtime::new().map_err(|e| SandboxError::Interpreter(e.to_string()))?;
        let context =
            Context::full(&runtime).map_err(|e| SandboxError::Interpreter(e.to_string()))?;
        let rng = Arc::new(Mutex::new(StdRng::from_entropy()));

        let modules = Arc::new(modules);
        let helpers = context
            .with(|ctx| {
                install(&ctx, policy, modules, rng.clone())?;
                Helpers::new(&ctx)
            })
            .map_err(|e| SandboxError::Interpreter(e.to_string()))?;

        debug!("quickjs interpreter ready");
        Ok(Self {
            helpers,
            runtime,
            context,
            rng,
        })
    }

    /// Cap the interpreter heap.
    pub fn set_memory_limit(&self, bytes: usize) {
        self.runtime.set_memory_limit(bytes);
    }

    /// Cap the interpreter stack.
    pub fn set_max_stack_size(&self, bytes: usize) {
        self.runtime.set_max_stack_size(bytes);
    }
}

impl Interpreter for QuickJs {
    fn builtin_names(&mut self) -> Result<Vec<String>, ScriptError> {
        self.context
            .with(|ctx| eval_script(&ctx, "Object.getOwnPropertyNames(globalThis)"))
    }

    fn remove_global(&mut self, name: &str) -> Result<(), ScriptError> {
        self.context
            .with(|ctx| ctx.globals().remove(name).map_err(|e| caught(&ctx, e)))
    }

    fn set_global(&mut self, name: &str, value: &Json) -> Result<(), ScriptError> {
        self.context.with(|ctx| {
            let value = to_js(&ctx, value)?;
            ctx.globals().set(name, value).map_err(|e| caught(&ctx, e))
        })
    }

    fn reseed(&mut self, seed: u64) {
        *self.rng.lock().unwrap_or_else(PoisonError::into_inner) = StdRng::seed_from_u64(seed);
    }

    fn run_statements(&mut self, code: &str) -> Result<(), ScriptError> {
        trace!(code_len = code.len(), "running statements");
        self.context.with(|ctx| eval_script(&ctx, code.trim_end()))
    }

    fn evaluate(&mut self, code: &str) -> Result<Evaluation, ScriptError> {
        let code = code.trim_end();
        self.context.with(|ctx| {
            // Parse as a function body first: creating the function runs
            // nothing, so a syntax error here means "not an expression".
            let probe = format!("(function () {{ return (\n{code}\n); }})");
            if let Err(err) = ctx.eval_with_options::<Value, _>(probe, script_options()) {
                let error = caught(&ctx, err);
                if error.name != "SyntaxError" {
                    return Err(error);
                }
                eval_script::<()>(&ctx, code)?;
                return Ok(Evaluation::Statements);
            }

            let value: Value = eval_script(&ctx, &format!("(\n{code}\n)"))?;
            to_script_value(&ctx, &self.helpers, value).map(Evaluation::Expression)
        })
    }

    fn probe(&mut self, name: &str) -> Result<Binding, ScriptError> {
        self.context.with(|ctx| match lookup(&ctx, name)? {
            None => Ok(Binding::Missing),
            Some(value) if value.is_function() => Ok(Binding::Callable),
            Some(value) => Ok(Binding::NotCallable {
                type_name: self.helpers.inspect(&ctx, value)?.0,
            }),
        })
    }

    fn call(&mut self, name: &str, args: Vec<Json>) -> Result<ScriptValue, ScriptError> {
        self.context.with(|ctx| {
            let Some(value) = lookup(&ctx, name)? else {
                return Err(ScriptError::new(
                    "ReferenceError",
                    format!("{name} is not defined"),
                ));
            };
            let Some(function) = value.as_function().cloned() else {
                return Err(ScriptError::new(
                    "TypeError",
                    format!("{name} is not a function"),
                ));
            };

            let mut js_args = Vec::with_capacity(args.len());
            for arg in &args {
                js_args.push(to_js(&ctx, arg)?);
            }

            let value: Value = function
                .call((Rest(js_args),))
                .map_err(|e| caught(&ctx, e))?;
            to_script_value(&ctx, &self.helpers, value)
        })
    }
}

/// Replace `Math.random` with the seeded generator and bind `require`.
fn install<'js>(
    ctx: &Ctx<'js>,
    policy: ModulePolicy,
    modules: Arc<ModuleRegistry>,
    rng: Arc<Mutex<StdRng>>,
) -> Result<(), ScriptError> {
    let globals = ctx.globals();

    let random = Function::new(ctx.clone(), move || -> f64 {
        rng.lock().unwrap_or_else(PoisonError::into_inner).gen()
    })
    .map_err(|e| caught(ctx, e))?;
    let math: Object = globals.get("Math").map_err(|e| caught(ctx, e))?;
    math.set("random", random).map_err(|e| caught(ctx, e))?;

    let check_modules = modules.clone();
    let check = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, name: String| -> rquickjs::Result<Option<Object<'js>>> {
            let denied = match policy.check(&name) {
                Ok(()) => check_modules.source(&name).err(),
                Err(denied) => Some(denied),
            };
            let Some(denied) = denied else {
                return Ok(None);
            };
            debug!(module = %name, kind = denied.kind(), "import rejected");
            let info = Object::new(ctx)?;
            info.set("kind", denied.kind())?;
            info.set("message", denied.to_string())?;
            Ok(Some(info))
        },
    )
    .map_err(|e| caught(ctx, e))?;

    let compile = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, name: String| -> rquickjs::Result<Function<'js>> {
            let source = modules.source(&name).unwrap_or_default();
            debug!(module = %name, "loading module");
            eval_internal(
                &ctx,
                &format!("modules/{name}"),
                format!("export default function (module, exports, require) {{\n{source}\n}}"),
            )
        },
    )
    .map_err(|e| caught(ctx, e))?;

    let shim: Function = eval_internal(ctx, "require", REQUIRE_SHIM).map_err(|e| caught(ctx, e))?;
    let require: Function = shim
        .call((check, compile))
        .map_err(|e| caught(ctx, e))?;
    globals.set("require", require).map_err(|e| caught(ctx, e))
}

fn script_options() -> EvalOptions {
    let mut options = EvalOptions::default();
    options.global = true;
    options.strict = false;
    options
}

fn eval_script<'js, V: FromJs<'js>>(ctx: &Ctx<'js>, source: &str) -> Result<V, ScriptError> {
    ctx.eval_with_options(source, script_options())
        .map_err(|e| caught(ctx, e))
}

/// Compile interpreter-owned source as a module named under
/// [`INTERNAL_SOURCE`] and return its default export. Module code is strict.
fn eval_internal<'js, V: FromJs<'js>>(
    ctx: &Ctx<'js>,
    name: &str,
    source: impl Into<Vec<u8>>,
) -> rquickjs::Result<V> {
    let module = Module::declare(ctx.clone(), format!("{INTERNAL_SOURCE}/{name}"), source)?;
    let (module, _) = module.eval()?;
    module.get("default")
}

/// Find `name` as a global property or a global lexical binding.
fn lookup<'js>(ctx: &Ctx<'js>, name: &str) -> Result<Option<Value<'js>>, ScriptError> {
    let value: Value = ctx.globals().get(name).map_err(|e| caught(ctx, e))?;
    if !value.is_undefined() {
        return Ok(Some(value));
    }
    // `let`/`const`/`class` at top level are not properties of globalThis.
    if !is_identifier(name) {
        return Ok(None);
    }
    match ctx.eval_with_options::<Value, _>(name, script_options()) {
        Ok(value) if !value.is_undefined() => Ok(Some(value)),
        Ok(_) => Ok(None),
        Err(err) => {
            let error = caught(ctx, err);
            trace!(name = %name, error = %error, "lexical lookup failed");
            Ok(None)
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn to_js<'js>(ctx: &Ctx<'js>, value: &Json) -> Result<Value<'js>, ScriptError> {
    let text = serde_json::to_string(value).map_err(|e| ScriptError::new("TypeError", e.to_string()))?;
    ctx.json_parse(text).map_err(|e| caught(ctx, e))
}

fn to_script_value<'js>(
    ctx: &Ctx<'js>,
    helpers: &Helpers,
    value: Value<'js>,
) -> Result<ScriptValue, ScriptError> {
    if value.is_undefined() || value.is_null() {
        return Ok(ScriptValue::null());
    }
    if let Some(type_name) = helpers.unsupported(ctx, value.clone())? {
        trace!(type_name = %type_name, "value has no data form");
        let (_, repr) = helpers.inspect(ctx, value)?;
        return Ok(ScriptValue::Opaque { type_name, repr });
    }
    let text = match ctx.json_stringify(value.clone()) {
        Ok(Some(text)) => text.to_string().map_err(|e| caught(ctx, e))?,
        Ok(None) => return Ok(ScriptValue::null()),
        Err(err) => return Err(caught(ctx, err)),
    };
    match serde_json::from_str(&text) {
        Ok(data) => Ok(ScriptValue::Data(data)),
        Err(err) => {
            trace!(error = %err, "stringified value did not parse");
            let (type_name, repr) = helpers.inspect(ctx, value)?;
            Ok(ScriptValue::Opaque { type_name, repr })
        }
    }
}

/// Take the pending exception off the context and describe it.
fn caught(ctx: &Ctx<'_>, error: rquickjs::Error) -> ScriptError {
    if !matches!(error, rquickjs::Error::Exception) {
        return ScriptError::new("InternalError", error.to_string());
    }
    let thrown = ctx.catch();
    if let Some(object) = thrown.as_object() {
        let field = |key: &str| object.get::<_, Option<String>>(key).ok().flatten();
        return ScriptError {
            name: field("name").unwrap_or_else(|| "Error".to_string()),
            message: field("message").unwrap_or_default(),
            frames: field("stack").map(|s| parse_stack(&s)).unwrap_or_default(),
        };
    }
    let message = thrown
        .as_string()
        .and_then(|s| s.to_string().ok())
        .unwrap_or_else(|| "non-error value thrown".to_string());
    ScriptError::new("Uncaught", message)
}

/// Keep the frames of a QuickJS stack that point into user source.
fn parse_stack(stack: &str) -> Vec<Frame> {
    stack
        .lines()
        .filter_map(|line| {
            let frame = line.trim().strip_prefix("at ")?;
            let (function, location) = match frame.split_once(" (") {
                Some((function, location)) => (function.trim(), location.trim_end_matches(')')),
                None => ("<eval>", frame),
            };
            if location == "native" || location.starts_with(INTERNAL_SOURCE) {
                return None;
            }
            let line = location.split(':').nth(1).and_then(|l| l.parse().ok());
            Some(Frame {
                function: function.to_string(),
                line,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn interpreter() -> QuickJs {
        let policy = ModulePolicy::new(["random", "itertools"], "https://example.org/modules");
        QuickJs::new(policy, ModuleRegistry::bundled()).unwrap()
    }

    #[test]
    fn test_parse_stack() {
        let stack = "    at choice (<sandbox>/random:8)\n    at add (eval_script:2)\n    at map (native)\n    at <eval> (eval_script:5)\n";
        let frames = parse_stack(stack);
        assert_eq!(
            frames,
            vec![
                Frame {
                    function: "add".into(),
                    line: Some(2)
                },
                Frame {
                    function: "<eval>".into(),
                    line: Some(5)
                },
            ]
        );
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("solve"));
        assert!(is_identifier("_private$1"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("a.b"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_statements_persist() {
        let mut js = interpreter();
        js.run_statements("var total = 40; function bump(n) { return total + n; }")
            .unwrap();
        assert_eq!(js.call("bump", vec![json!(2)]).unwrap(), ScriptValue::Data(json!(42)));
    }

    #[test]
    fn test_lexical_bindings_are_found() {
        let mut js = interpreter();
        js.run_statements("const twice = (x) => x * 2; let count = 1;").unwrap();
        assert_eq!(js.probe("twice").unwrap(), Binding::Callable);
        assert_eq!(
            js.probe("count").unwrap(),
            Binding::NotCallable {
                type_name: "number".into()
            }
        );
        assert_eq!(js.probe("nothing_here").unwrap(), Binding::Missing);
    }

    #[test]
    fn test_evaluate_expression_and_statements() {
        let mut js = interpreter();
        assert_eq!(
            js.evaluate("1 + 2").unwrap(),
            Evaluation::Expression(ScriptValue::Data(json!(3)))
        );
        assert_eq!(js.evaluate("var y = 5;").unwrap(), Evaluation::Statements);
        assert_eq!(
            js.evaluate("y * 2").unwrap(),
            Evaluation::Expression(ScriptValue::Data(json!(10)))
        );
    }

    #[test]
    fn test_runtime_error_is_not_swallowed_by_fallback() {
        let mut js = interpreter();
        let err = js.evaluate("undefinedThing + 1").unwrap_err();
        assert_eq!(err.name, "ReferenceError");
    }

    #[test]
    fn test_opaque_values() {
        let mut js = interpreter();
        match js.evaluate("(function named() {})").unwrap() {
            Evaluation::Expression(ScriptValue::Opaque { type_name, repr }) => {
                assert_eq!(type_name, "function");
                assert_eq!(repr, "<function named>");
            }
            other => panic!("unexpected evaluation: {other:?}"),
        }
        match js.evaluate("(() => { const o = {}; o.self = o; return o; })()").unwrap() {
            Evaluation::Expression(ScriptValue::Opaque { type_name, .. }) => {
                assert_eq!(type_name, "Object");
            }
            other => panic!("unexpected evaluation: {other:?}"),
        }
    }

    #[test]
    fn test_values_without_data_form_are_opaque() {
        let mut js = interpreter();
        let cases = [
            ("new Set([1])", "Set"),
            ("new Map([[1, 2]])", "Map"),
            ("({ f() {} })", "function"),
            ("({ u: undefined })", "undefined"),
            ("[1, { when: new Date(0) }]", "Date"),
            ("[1n]", "bigint"),
        ];
        for (code, expected) in cases {
            match js.evaluate(code).unwrap() {
                Evaluation::Expression(ScriptValue::Opaque { type_name, .. }) => {
                    assert_eq!(type_name, expected, "{code}");
                }
                other => panic!("{code} gave {other:?}"),
            }
        }
    }

    #[test]
    fn test_shared_references_are_data() {
        let mut js = interpreter();
        assert_eq!(
            js.evaluate("(() => { const p = [1]; return { a: p, b: p, c: null }; })()")
                .unwrap(),
            Evaluation::Expression(ScriptValue::Data(json!({"a": [1], "b": [1], "c": null})))
        );
        assert_eq!(
            js.evaluate("Object.assign(Object.create(null), { k: 'v' })").unwrap(),
            Evaluation::Expression(ScriptValue::Data(json!({"k": "v"})))
        );
    }

    #[test]
    fn test_module_frames_are_dropped() {
        let mut js = interpreter();
        js.run_statements("function pick() {\n  return require('random').choice([]);\n}")
            .unwrap();
        let err = js.call("pick", vec![]).unwrap_err();
        assert_eq!(err.name, "RangeError");
        assert_eq!(
            err.frames,
            vec![Frame {
                function: "pick".into(),
                line: Some(2)
            }]
        );
    }

    #[test]
    fn test_seeded_random_is_deterministic() {
        let mut js = interpreter();
        js.reseed(99);
        let first = js.evaluate("[Math.random(), Math.random()]").unwrap();
        js.reseed(99);
        let second = js.evaluate("[Math.random(), Math.random()]").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_require_respects_policy() {
        let policy = ModulePolicy::new(["itertools"], "https://example.org/modules");
        let mut js = QuickJs::new(policy.clone(), ModuleRegistry::bundled()).unwrap();

        assert_eq!(
            js.evaluate("require('itertools').range(3)").unwrap(),
            Evaluation::Expression(ScriptValue::Data(json!([0, 1, 2])))
        );

        let err = js.run_statements("require('clock')").unwrap_err();
        assert_eq!(err.name, "ImportError");
        assert!(err.message.contains("`clock`"));

        policy.allow(["clock"]);
        js.run_statements("var clock = require('clock')").unwrap();
        assert_eq!(js.probe("clock").unwrap(), Binding::NotCallable { type_name: "Object".into() });

        policy.allow(["ghost"]);
        let err = js.run_statements("require('ghost')").unwrap_err();
        assert_eq!(err.name, "ModuleNotFoundError");
    }

    #[test]
    fn test_remove_and_set_global() {
        let mut js = interpreter();
        js.remove_global("JSON").unwrap();
        let err = js.run_statements("JSON.stringify(1)").unwrap_err();
        assert_eq!(err.name, "ReferenceError");

        js.set_global("__name__", &json!("__main__")).unwrap();
        assert_eq!(
            js.evaluate("__name__").unwrap(),
            Evaluation::Expression(ScriptValue::Data(json!("__main__")))
        );
    }
}
