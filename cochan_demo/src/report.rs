use cochan_core::{CoroutineError, Status, Value};
use serde::Serialize;

/// One observed handoff.
#[derive(Serialize, Debug)]
pub struct Event<'a> {
    pub scenario: &'a str,
    pub step: usize,
    pub status: Status,
    pub values: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Reporter {
    json: bool,
}

impl Reporter {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn handoff(&self, scenario: &str, step: usize, status: Status, values: &[Value]) {
        self.emit(Event {
            scenario,
            step,
            status,
            values,
            error: None,
        });
    }

    pub fn failure(&self, scenario: &str, step: usize, status: Status, err: &CoroutineError) {
        self.emit(Event {
            scenario,
            step,
            status,
            values: &[],
            error: Some(err.to_string()),
        });
    }

    fn emit(&self, event: Event<'_>) {
        if self.json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => eprintln!("Failed to encode event: {}", e),
            }
            return;
        }

        let values = Value::List(event.values.to_vec());
        match &event.error {
            Some(err) => println!(
                "[{}] #{} {} !! {}",
                event.scenario, event.step, event.status, err
            ),
            None => println!(
                "[{}] #{} {} -> {}",
                event.scenario, event.step, event.status, values
            ),
        }
    }
}
