use anyhow::{anyhow, bail, Context, Result};

/// Credentials as a human would type them into the portal form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormSubmission {
    pub fields: Vec<(String, String)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceAction {
    LinkDown,
    LinkUp,
    LinkFail(u32),
    BusDown,
    BusUp,
    BusFail(u32),
    Confirm(FormSubmission),
    PortalReset,
    ResetConfig,
    Publish { topic: String, payload: String },
    Message { topic: String, payload: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceEvent {
    pub at_ms: u64,
    pub action: TraceAction,
}

/// Parses a trace: one `<ms> <action> [args..]` per line, `#` starts a comment,
/// timestamps must not go backwards.
pub fn parse_trace(text: &str) -> Result<Vec<TraceEvent>> {
    let mut events: Vec<TraceEvent> = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let event = parse_line(line).with_context(|| format!("line {}", index + 1))?;
        if let Some(last) = events.last() {
            if event.at_ms < last.at_ms {
                bail!(
                    "line {}: timestamp {} before previous {}",
                    index + 1,
                    event.at_ms,
                    last.at_ms
                );
            }
        }
        events.push(event);
    }
    Ok(events)
}

fn parse_line(line: &str) -> Result<TraceEvent> {
    let mut words = line.split_whitespace();
    let at_ms = words
        .next()
        .ok_or_else(|| anyhow!("missing timestamp"))?
        .parse::<u64>()
        .context("timestamp")?;
    let verb = words.next().ok_or_else(|| anyhow!("missing action"))?;
    let args: Vec<&str> = words.collect();

    let action = match (verb, args.as_slice()) {
        ("link", ["down"]) => TraceAction::LinkDown,
        ("link", ["up"]) => TraceAction::LinkUp,
        ("link", ["fail", count]) => TraceAction::LinkFail(parse_count(count)?),
        ("bus", ["down"]) => TraceAction::BusDown,
        ("bus", ["up"]) => TraceAction::BusUp,
        ("bus", ["fail", count]) => TraceAction::BusFail(parse_count(count)?),
        ("confirm", pairs) if !pairs.is_empty() => TraceAction::Confirm(parse_form(pairs)?),
        ("portal-reset", []) => TraceAction::PortalReset,
        ("reset-config", []) => TraceAction::ResetConfig,
        ("publish", [topic, payload]) => TraceAction::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
        },
        ("message", [topic, payload]) => TraceAction::Message {
            topic: topic.to_string(),
            payload: payload.to_string(),
        },
        _ => bail!("unknown action `{}`", line),
    };
    Ok(TraceEvent { at_ms, action })
}

fn parse_count(raw: &str) -> Result<u32> {
    raw.parse::<u32>()
        .with_context(|| format!("invalid count `{raw}`"))
}

fn parse_form(pairs: &[&str]) -> Result<FormSubmission> {
    let fields = pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .ok_or_else(|| anyhow!("expected key=value, got `{pair}`"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(FormSubmission { fields })
}
