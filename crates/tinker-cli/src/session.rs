//! A single computer session driven from the command line.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tinker_http::{HttpApi, NetTransport};
use tinker_kernel::{
    Arguments, Computer, ConfigHandle, CoreConfig, Event, MethodResult, MetricsRecorder, Table,
    Value,
};
use tracing::debug;

/// How often the computer is ticked while waiting for events.
const TICK: Duration = Duration::from_secs(1);

/// One computer with the `http` API installed.
pub struct Session {
    computer: Computer,
    metrics: Arc<MetricsRecorder>,
    wait: Duration,
}

impl Session {
    /// Boot a computer against the real network transport.
    pub fn start(config: CoreConfig, wait: Duration) -> Result<Self> {
        if !config.http.enabled {
            bail!("the http API is disabled (http.enabled = false)");
        }
        let transport = NetTransport::new().context("failed to build the HTTP client")?;
        let metrics = Arc::new(MetricsRecorder::new());
        let mut computer = Computer::new(
            0,
            ConfigHandle::new(config),
            metrics.clone(),
            tokio::runtime::Handle::current(),
        );
        let api = HttpApi::new(computer.environment().clone(), Arc::new(transport));
        computer.add_api(Arc::new(api));
        computer.turn_on();
        Ok(Self {
            computer,
            metrics,
            wait,
        })
    }

    /// Call an `http` method.  A `(false, message)` result is an error.
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<()> {
        let result = self
            .computer
            .call("http", method, args)
            .with_context(|| format!("http.{method} failed"))?;
        match result.first() {
            Some(Value::Boolean(true)) => Ok(()),
            _ => Err(anyhow!(
                "http.{method} rejected: {}",
                result.get(1).map(display).unwrap_or_default()
            )),
        }
    }

    /// Call `method` on an object a previous event handed out.
    pub fn call_object(&self, object: &Value, method: &str, args: Vec<Value>) -> Result<MethodResult> {
        let object = object
            .as_object()
            .ok_or_else(|| anyhow!("expected an object, got {}", object.type_name()))?;
        object
            .call_method(
                self.computer.environment().context(),
                method,
                &Arguments::new(args),
            )
            .with_context(|| format!("{method} failed"))
    }

    /// Wait for the next event named one of `names`, printing any others.
    pub async fn wait_for(&mut self, names: &[&str]) -> Result<Event> {
        let deadline = tokio::time::sleep(self.wait);
        tokio::pin!(deadline);
        let mut ticks = tokio::time::interval(TICK);

        loop {
            tokio::select! {
                event = self.computer.next_event() => {
                    let event = event.context("the computer's event queue closed")?;
                    if names.contains(&event.name.as_str()) {
                        return Ok(event);
                    }
                    debug!(event = %event.name, "ignoring event");
                    println!("{}", format_event(&event));
                }
                _ = ticks.tick() => self.computer.tick(),
                _ = &mut deadline => bail!("no {} event within {:?}", names.join("/"), self.wait),
            }
        }
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn shutdown(mut self) {
        self.computer.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Render an event as `name arg1 arg2 ...`.
pub fn format_event(event: &Event) -> String {
    let mut line = event.name.clone();
    for arg in &event.args {
        line.push(' ');
        line.push_str(&display(arg));
    }
    line
}

/// Render a value the way a program would print it.
pub fn display(value: &Value) -> String {
    match value {
        Value::Nil => "nil".into(),
        Value::Boolean(b) => b.to_string(),
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        Value::Table(table) => display_table(table),
        Value::Object(_) => "<object>".into(),
    }
}

fn display_table(table: &Table) -> String {
    let mut entries: Vec<String> = table
        .iter()
        .map(|(key, value)| format!("{} = {}", display(key), display(value)))
        .collect();
    entries.sort();
    format!("{{{}}}", entries.join(", "))
}

/// Parse `Name: value` pairs into a header table.
pub fn header_table(headers: &[String]) -> Result<Table> {
    let mut table = Table::new();
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("header '{header}' is not of the form 'Name: value'"))?;
        table.insert(name.trim(), value.trim());
    }
    Ok(table)
}
