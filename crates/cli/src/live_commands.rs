use std::time::Duration;

use {
    anyhow::{Context, Result, bail},
    dashlive_live::{
        ChannelMessage, ChannelState, LiveChannel, LiveScope, LiveService, NamespaceInfo,
    },
    serde_json::Value,
    tokio_stream::StreamExt,
    tracing::{debug, info},
};

/// Print every event of a channel as one JSON line until it closes, `count`
/// data messages arrive, or the process is interrupted.
pub async fn watch(service: &LiveService, id: &str, count: Option<usize>) -> Result<()> {
    let channel = service.get_channel_by_id(id)?;
    let mut stream = channel.stream();
    let mut received = 0usize;

    loop {
        let msg = tokio::select! {
            msg = stream.next() => msg,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            },
        };
        let Some(msg) = msg else {
            break;
        };
        println!("{}", serde_json::to_string(&msg)?);
        if matches!(msg, ChannelMessage::Message { .. }) {
            received += 1;
            if count.is_some_and(|n| received >= n) {
                break;
            }
        }
    }

    let status = channel.status();
    if status.state == ChannelState::Invalid {
        bail!(
            "channel {id} is invalid: {}",
            status.error.unwrap_or_default()
        );
    }
    Ok(())
}

/// Publish one JSON payload and print the server's reply.
pub async fn publish(service: &LiveService, id: &str, data: &str, timeout: Duration) -> Result<()> {
    let data: Value = serde_json::from_str(data).context("payload must be valid JSON")?;
    let channel = service.get_channel_by_id(id)?;
    wait_until_connected(&channel, timeout).await?;

    let Some(publisher) = channel.publisher() else {
        bail!("channel {id} does not allow publishing");
    };
    let reply = publisher.publish(data).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

/// Print who is currently subscribed to a channel.
pub async fn presence(service: &LiveService, id: &str, timeout: Duration) -> Result<()> {
    let channel = service.get_channel_by_id(id)?;
    wait_until_connected(&channel, timeout).await?;

    let Some(handle) = channel.presence() else {
        bail!("channel {id} does not track presence");
    };
    let snapshot = handle.get().await?;
    if snapshot.clients.is_empty() {
        println!("No clients.");
        return Ok(());
    }
    let mut clients: Vec<_> = snapshot.clients.into_iter().collect();
    clients.sort_by(|a, b| a.0.cmp(&b.0));
    for (client, info) in clients {
        println!("  {client}  user={}", info.user);
    }
    Ok(())
}

/// List namespaces of one scope, or of every registered scope.
pub async fn namespaces(service: &LiveService, scope: Option<&str>) -> Result<()> {
    let scopes = match scope {
        Some(s) => vec![s.parse::<LiveScope>()?],
        None => service.scopes(),
    };
    for scope in scopes {
        let namespaces = service.list_namespaces(scope).await?;
        println!("{scope}:");
        if namespaces.is_empty() {
            println!("  (none)");
        }
        for line in namespace_lines(&namespaces) {
            println!("{line}");
        }
    }
    Ok(())
}

fn namespace_lines(namespaces: &[NamespaceInfo]) -> Vec<String> {
    let width = namespaces
        .iter()
        .map(|n| n.namespace.len())
        .max()
        .unwrap_or(0);
    namespaces
        .iter()
        .map(|n| match n.description {
            Some(ref d) => format!("  {:<width$}  {d}", n.namespace),
            None => format!("  {}", n.namespace),
        })
        .collect()
}

/// Follow the channel's status until it is connected, or fail if it closes
/// or `timeout` passes first.
async fn wait_until_connected(channel: &LiveChannel, timeout: Duration) -> Result<()> {
    let mut stream = channel.stream();
    let wait = async {
        while let Some(msg) = stream.next().await {
            let ChannelMessage::Status(status) = msg else {
                continue;
            };
            debug!(channel = %status.id, state = %status.state, "status");
            match status.state {
                ChannelState::Connected => return Ok(()),
                ChannelState::Invalid | ChannelState::Shutdown => bail!(
                    "channel {} is {}: {}",
                    status.id,
                    status.state,
                    status.error.unwrap_or_default()
                ),
                ChannelState::Pending | ChannelState::Disconnected => {},
            }
        }
        bail!("channel {} closed", channel.id())
    };
    tokio::time::timeout(timeout, wait)
        .await
        .with_context(|| format!("timed out waiting for {}", channel.id()))?
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn namespace_descriptions_are_aligned() {
        let lines = namespace_lines(&[
            NamespaceInfo {
                namespace: "testdata".into(),
                description: Some("Test data".into()),
            },
            NamespaceInfo {
                namespace: "stream".into(),
                description: None,
            },
            NamespaceInfo {
                namespace: "broadcast".into(),
                description: Some("Broadcast".into()),
            },
        ]);
        assert_eq!(lines, vec![
            "  testdata   Test data".to_string(),
            "  stream".to_string(),
            "  broadcast  Broadcast".to_string(),
        ]);
    }
}
