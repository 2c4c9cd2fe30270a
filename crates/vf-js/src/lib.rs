//! Per-frame script realm.
//!
//! Each patched frame gets its own boa context. The prelude swaps the
//! console for a counting no-op and routes `postMessage` into an outbox the
//! host drains after every script batch.

use boa_engine::Context;
use boa_engine::Source;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;
use vf_core::VirtError;
use vf_core::VirtResult;

const PRELUDE: &str = r#"
globalThis.window = globalThis;
globalThis.self = globalThis;
(function () {
  var levels = ["log", "info", "warn", "error", "debug", "trace"];
  var counts = {};
  var quiet = {};
  levels.forEach(function (level) {
    counts[level] = 0;
    quiet[level] = function () { counts[level] += 1; };
  });
  globalThis.console = quiet;
  globalThis.__vf_take_console = function () {
    var out = JSON.stringify(counts);
    levels.forEach(function (level) { counts[level] = 0; });
    return out;
  };

  var outbox = [];
  function post(message, targetOrigin) {
    var data;
    try {
      data = JSON.stringify(message);
    } catch (_error) {
      data = JSON.stringify(String(message));
    }
    outbox.push({ data: data === undefined ? "null" : data, requested: String(targetOrigin) });
  }
  globalThis.postMessage = post;
  globalThis.parent = { postMessage: post };
  globalThis.top = globalThis.parent;
  globalThis.__vf_take_messages = function () {
    var out = JSON.stringify(outbox);
    outbox.length = 0;
    return out;
  };

  var timers = [];
  var cancelled = {};
  var nextTimer = 1;
  globalThis.setTimeout = function (callback) {
    var id = nextTimer++;
    if (typeof callback === "function") {
      timers.push({ id: id, cb: callback });
    }
    return id;
  };
  globalThis.clearTimeout = function (id) { cancelled[String(id)] = true; };
  globalThis.queueMicrotask = function (callback) { globalThis.setTimeout(callback); };
  globalThis.__vf_flush_timers = function (limit) {
    var runs = 0;
    while (timers.length > 0 && runs < limit) {
      var task = timers.shift();
      if (!cancelled[String(task.id)]) {
        task.cb();
      }
      delete cancelled[String(task.id)];
      runs++;
    }
    return runs;
  };
})();
"#;

/// Script payload and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    pub origin: String,
    pub source: String,
}

impl ScriptSource {
    pub fn inline(index: usize, source: impl Into<String>) -> Self {
        Self {
            origin: format!("inline:{index}"),
            source: source.into(),
        }
    }
}

/// Realm hardening knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRealmConfig {
    /// Scripts larger than this are skipped.
    pub max_script_bytes: usize,
    pub max_error_messages: usize,
    pub recursion_limit: usize,
    pub stack_size_limit: usize,
    pub loop_iteration_limit: u64,
    /// Timer callbacks run after each script.
    pub timer_flush_limit: u32,
}

impl Default for ScriptRealmConfig {
    fn default() -> Self {
        Self {
            max_script_bytes: 4 * 1024 * 1024,
            max_error_messages: 24,
            recursion_limit: 64,
            stack_size_limit: 1024,
            loop_iteration_limit: 100_000,
            timer_flush_limit: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub origin: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealmReport {
    pub scripts_seen: usize,
    pub scripts_executed: usize,
    pub scripts_failed: usize,
    pub scripts_skipped: usize,
    pub errors: Vec<ScriptError>,
}

/// A message posted from script. `target_origin` is always `"*"`; the
/// origin the script asked for is kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub data: String,
    pub requested_origin: String,
    pub target_origin: String,
}

/// Console calls swallowed since the last drain, by level.
pub type ConsoleTally = BTreeMap<String, u64>;

pub struct FrameRealm {
    context: Context,
    config: ScriptRealmConfig,
    location: String,
}

impl fmt::Debug for FrameRealm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRealm")
            .field("location", &self.location)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FrameRealm {
    pub fn new(config: ScriptRealmConfig, location: &str) -> VirtResult<Self> {
        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_recursion_limit(config.recursion_limit);
        context
            .runtime_limits_mut()
            .set_stack_size_limit(config.stack_size_limit);
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(config.loop_iteration_limit);

        context
            .eval(Source::from_bytes(PRELUDE.as_bytes()))
            .map_err(|error| {
                VirtError::new("js.realm.prelude_failed", format!("realm prelude failed: {error}"))
            })?;
        let location_script = format!(
            "globalThis.location = {{ href: {href:?}, toString: function () {{ return this.href; }} }};",
            href = location
        );
        context
            .eval(Source::from_bytes(location_script.as_bytes()))
            .map_err(|error| {
                VirtError::new("js.realm.prelude_failed", format!("location setup failed: {error}"))
            })?;

        Ok(Self {
            context,
            config,
            location: location.to_owned(),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Runs scripts in order. A failing script does not stop the batch.
    pub fn run_scripts(&mut self, scripts: &[ScriptSource]) -> RealmReport {
        let mut report = RealmReport {
            scripts_seen: scripts.len(),
            ..RealmReport::default()
        };

        for script in scripts {
            if script.source.len() > self.config.max_script_bytes {
                report.scripts_skipped = report.scripts_skipped.saturating_add(1);
                debug!(origin = %script.origin, bytes = script.source.len(), "skipping oversized script");
                continue;
            }

            match self.context.eval(Source::from_bytes(script.source.as_bytes())) {
                Ok(_) => {
                    report.scripts_executed = report.scripts_executed.saturating_add(1);
                    self.flush_timers();
                }
                Err(error) => {
                    report.scripts_failed = report.scripts_failed.saturating_add(1);
                    debug!(origin = %script.origin, %error, "script failed");
                    if report.errors.len() < self.config.max_error_messages {
                        report.errors.push(ScriptError {
                            origin: script.origin.clone(),
                            message: error.to_string(),
                        });
                    }
                }
            }
        }

        report
    }

    /// Evaluates an expression and returns its string conversion.
    pub fn eval_to_string(&mut self, source: &str) -> VirtResult<String> {
        let value = self
            .context
            .eval(Source::from_bytes(source.as_bytes()))
            .map_err(|error| VirtError::new("js.realm.eval_failed", error.to_string()))?;
        let text = value
            .to_string(&mut self.context)
            .map_err(|error| VirtError::new("js.realm.eval_failed", error.to_string()))?;
        Ok(text.to_std_string_escaped())
    }

    /// Messages posted since the last drain, in posting order.
    pub fn take_posted_messages(&mut self) -> VirtResult<Vec<PostedMessage>> {
        let raw = self.eval_to_string("__vf_take_messages()")?;
        let entries: Vec<serde_json::Value> = serde_json::from_str(&raw).map_err(|error| {
            VirtError::new("js.realm.outbox_invalid", format!("outbox is not JSON: {error}"))
        })?;

        Ok(entries
            .into_iter()
            .map(|entry| PostedMessage {
                data: entry["data"].as_str().unwrap_or("null").to_owned(),
                requested_origin: entry["requested"].as_str().unwrap_or_default().to_owned(),
                target_origin: "*".to_owned(),
            })
            .collect())
    }

    pub fn take_console_tally(&mut self) -> VirtResult<ConsoleTally> {
        let raw = self.eval_to_string("__vf_take_console()")?;
        serde_json::from_str(&raw).map_err(|error| {
            VirtError::new("js.realm.console_invalid", format!("console tally is not JSON: {error}"))
        })
    }

    fn flush_timers(&mut self) {
        let flush = format!("__vf_flush_timers({})", self.config.timer_flush_limit);
        if let Err(error) = self.context.eval(Source::from_bytes(flush.as_bytes())) {
            debug!(%error, "timer callback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FrameRealm;
    use super::ScriptRealmConfig;
    use super::ScriptSource;

    fn realm() -> FrameRealm {
        match FrameRealm::new(ScriptRealmConfig::default(), "archive:/index.html") {
            Ok(realm) => realm,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn console_is_counted_and_silenced() {
        let mut realm = realm();
        let report = realm.run_scripts(&[ScriptSource::inline(
            0,
            "console.log('a', {b: 1}); console.log(); console.error(new Error('x'));",
        )]);
        assert_eq!(report.scripts_executed, 1);

        let tally = match realm.take_console_tally() {
            Ok(tally) => tally,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(tally.get("log"), Some(&2));
        assert_eq!(tally.get("error"), Some(&1));
        assert_eq!(tally.get("warn"), Some(&0));

        let again = match realm.take_console_tally() {
            Ok(tally) => tally,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(again.get("log"), Some(&0));
    }

    #[test]
    fn post_message_always_targets_any_origin() {
        let mut realm = realm();
        let report = realm.run_scripts(&[ScriptSource::inline(
            0,
            "parent.postMessage({type: 'ready', page: 3}, 'https://host.example'); postMessage('plain');",
        )]);
        assert_eq!(report.scripts_failed, 0);

        let messages = match realm.take_posted_messages() {
            Ok(messages) => messages,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].data, r#"{"type":"ready","page":3}"#);
        assert_eq!(messages[0].requested_origin, "https://host.example");
        assert!(messages.iter().all(|message| message.target_origin == "*"));
        assert_eq!(messages[1].data, r#""plain""#);

        assert!(matches!(realm.take_posted_messages(), Ok(messages) if messages.is_empty()));
    }

    #[test]
    fn failing_scripts_do_not_stop_the_batch() {
        let mut realm = realm();
        let report = realm.run_scripts(&[
            ScriptSource::inline(0, "throw new Error('boom');"),
            ScriptSource::inline(1, "globalThis.reached = location.href;"),
        ]);
        assert_eq!(report.scripts_failed, 1);
        assert_eq!(report.scripts_executed, 1);
        assert_eq!(report.errors[0].origin, "inline:0");
        assert_eq!(
            realm.eval_to_string("reached"),
            Ok("archive:/index.html".to_owned())
        );
    }

    #[test]
    fn timers_run_after_each_script() {
        let mut realm = realm();
        let report = realm.run_scripts(&[ScriptSource::inline(
            0,
            "globalThis.order = []; setTimeout(function () { order.push('timer'); }); order.push('sync');",
        )]);
        assert_eq!(report.scripts_executed, 1);
        assert_eq!(realm.eval_to_string("order.join(',')"), Ok("sync,timer".to_owned()));
    }

    #[test]
    fn oversized_scripts_are_skipped() {
        let mut realm = match FrameRealm::new(
            ScriptRealmConfig {
                max_script_bytes: 16,
                ..ScriptRealmConfig::default()
            },
            "about:blank",
        ) {
            Ok(realm) => realm,
            Err(error) => panic!("{error}"),
        };
        let report = realm.run_scripts(&[ScriptSource::inline(0, "globalThis.x = 'a long script body';")]);
        assert_eq!(report.scripts_skipped, 1);
        assert_eq!(report.scripts_executed, 0);
    }
}
