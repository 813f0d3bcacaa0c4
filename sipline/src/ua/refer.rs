//! Call transfer via REFER and its implicit subscription (RFC 3515).

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::dialog::Dialog;
use crate::error::{Error, Result};
use crate::headers::{ContentType, Event, Header, MediaType, ReferTo, SubscriptionState};
use crate::message::{NameAddr, Param, SipMethod, StatusCode, Uri};
use crate::transaction::{ClientTransaction, TsxEvent};
use crate::transport::IncomingRequest;
use crate::ua::{UaEvent, UaInner};
use crate::Endpoint;

/// Progress of a transfer, distilled from the sipfrag NOTIFY bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferProgress {
    /// The transfer target is being tried (100).
    Trying,
    /// The target is ringing (180).
    Ringing,
    /// The new call succeeded; this leg can be torn down.
    Succeeded,
    /// The new call failed with the given status.
    Failed(StatusCode),
}

pub type TransferProgressRx = mpsc::UnboundedReceiver<TransferProgress>;

/// Book-keeping for one implicit subscription created by an outbound
/// REFER, keyed by dialog identity.
pub(crate) struct TransferState {
    progress_tx: mpsc::UnboundedSender<TransferProgress>,
}

/// Issue a REFER inside the dialog. Attended transfer embeds a
/// Replaces header in the Refer-To URI.
pub(crate) async fn send_refer(
    ua: &Arc<UaInner>,
    dialog: Dialog,
    target: Uri,
    attended: bool,
) -> Result<TransferProgressRx> {
    let endpoint = ua.endpoint().clone();

    let mut refer_to = target;
    if attended {
        // Attended transfer: the target should replace its existing leg
        // with the transferee.
        let id = dialog.id();
        let replaces = format!(
            "{};to-tag={};from-tag={}",
            id.call_id, id.remote_tag, id.local_tag
        );
        refer_to.headers.push(Param {
            name: "Replaces".to_string(),
            value: Some(escape_uri_header(&replaces)),
        });
    }

    let mut request = dialog.create_request(SipMethod::Refer);
    request
        .headers
        .push(Header::ReferTo(ReferTo::new(NameAddr::new(refer_to))));
    request.headers.push(Header::Event(Event::refer()));

    let outgoing = endpoint.prepare_request(request).await?;
    let (_tsx, mut rx) = ClientTransaction::send(outgoing, &endpoint).await?;

    // The REFER must be accepted before NOTIFYs mean anything.
    loop {
        match rx.recv().await {
            Some(TsxEvent::Response(response)) if response.code().is_final() => {
                if !response.code().is_success() {
                    return Err(Error::ProtocolViolation("REFER rejected"));
                }
                break;
            }
            Some(TsxEvent::Response(_)) => continue,
            Some(TsxEvent::Timeout) => return Err(Error::TsxTimeout),
            Some(TsxEvent::Terminated) | None => return Err(Error::ChannelClosed),
        }
    }

    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    ua.transfers.lock().expect("Lock failed").insert(
        dialog.id().to_string(),
        TransferState { progress_tx },
    );

    Ok(progress_rx)
}

/// An inbound REFER: accept it, tell the application, and report
/// progress of the replacement call through NOTIFYs.
pub(crate) async fn on_refer(
    ua: Arc<UaInner>,
    endpoint: &Endpoint,
    dialog: Dialog,
    mut request: IncomingRequest,
) -> Result<()> {
    let Some(refer_to) = request.request().headers.find_map(|h| match h {
        Header::ReferTo(refer_to) => Some(refer_to),
        _ => None,
    }) else {
        let tsx = endpoint.new_server_tsx(&mut request);
        let mut response = endpoint.new_response(&request, StatusCode::BadRequest, None);
        return tsx.respond(&mut response).await;
    };
    let target = refer_to.addr.uri.clone();

    let tsx = endpoint.new_server_tsx(&mut request);
    let mut response = endpoint.new_response(&request, StatusCode::Accepted, None);
    tsx.respond(&mut response).await?;

    // The implicit subscription starts with a 100 Trying NOTIFY.
    notify_progress(&ua, &dialog, TransferProgress::Trying, false).await?;

    ua.emit(UaEvent::TransferRequested {
        dialog: dialog.id().clone(),
        target,
    });
    Ok(())
}

/// Report transfer progress to the peer that sent the REFER.
pub(crate) async fn notify_progress(
    ua: &Arc<UaInner>,
    dialog: &Dialog,
    progress: TransferProgress,
    terminal: bool,
) -> Result<()> {
    let endpoint = ua.endpoint().clone();

    let sipfrag = match &progress {
        TransferProgress::Trying => "SIP/2.0 100 Trying\r\n",
        TransferProgress::Ringing => "SIP/2.0 180 Ringing\r\n",
        TransferProgress::Succeeded => "SIP/2.0 200 OK\r\n",
        TransferProgress::Failed(code) => {
            return notify_failure(ua, dialog, *code).await;
        }
    };

    let mut request = dialog.create_request(SipMethod::Notify);
    request.headers.push(Header::Event(Event::refer()));
    request.headers.push(Header::SubscriptionState(if terminal {
        SubscriptionState::terminated("noresource")
    } else {
        SubscriptionState::active(60)
    }));
    request
        .headers
        .push(Header::ContentType(ContentType::new(MediaType::sipfrag())));
    request.body = Some(Bytes::from_static(sipfrag.as_bytes()));

    let outgoing = endpoint.prepare_request(request).await?;
    let (_tsx, mut rx) = ClientTransaction::send(outgoing, &endpoint).await?;
    tokio::spawn(async move { while rx.recv().await.is_some() {} });
    Ok(())
}

async fn notify_failure(ua: &Arc<UaInner>, dialog: &Dialog, code: StatusCode) -> Result<()> {
    let endpoint = ua.endpoint().clone();
    let sipfrag = format!("SIP/2.0 {} {}\r\n", code.code(), code.reason());

    let mut request = dialog.create_request(SipMethod::Notify);
    request.headers.push(Header::Event(Event::refer()));
    request
        .headers
        .push(Header::SubscriptionState(SubscriptionState::terminated(
            "noresource",
        )));
    request
        .headers
        .push(Header::ContentType(ContentType::new(MediaType::sipfrag())));
    request.body = Some(Bytes::from(sipfrag));

    let outgoing = endpoint.prepare_request(request).await?;
    let (_tsx, mut rx) = ClientTransaction::send(outgoing, &endpoint).await?;
    tokio::spawn(async move { while rx.recv().await.is_some() {} });
    Ok(())
}

/// A NOTIFY on a dialog with a pending transfer: surface the sipfrag
/// status and end the subscription on a terminal state.
pub(crate) async fn on_notify(
    ua: Arc<UaInner>,
    endpoint: &Endpoint,
    dialog: Dialog,
    mut request: IncomingRequest,
) -> Result<()> {
    let terminated = request
        .request()
        .headers
        .find_map(|h| match h {
            Header::SubscriptionState(state) => Some(state),
            _ => None,
        })
        .is_some_and(SubscriptionState::is_terminated);

    let progress = request.body().and_then(|body| parse_sipfrag(body));

    let tsx = endpoint.new_server_tsx(&mut request);
    let mut response = endpoint.new_response(&request, StatusCode::Ok, None);
    tsx.respond(&mut response).await?;

    let key = dialog.id().to_string();
    let transfers = ua.transfers.lock().expect("Lock failed");
    let Some(state) = transfers.get(&key) else {
        return Ok(());
    };

    if let Some(progress) = progress.clone() {
        let _ = state.progress_tx.send(progress.clone());
        ua.emit(UaEvent::TransferProgress {
            dialog: dialog.id().clone(),
            progress,
        });
    }

    let done = terminated
        || matches!(
            progress,
            Some(TransferProgress::Succeeded | TransferProgress::Failed(_))
        );
    drop(transfers);
    if done {
        ua.transfers.lock().expect("Lock failed").remove(&key);
    }
    Ok(())
}

/// The status line of a `message/sipfrag` body.
fn parse_sipfrag(body: &Bytes) -> Option<TransferProgress> {
    let text = std::str::from_utf8(body).ok()?;
    let first_line = text.lines().next()?;
    let mut parts = first_line.split_whitespace();

    if parts.next()? != "SIP/2.0" {
        return None;
    }
    let code: u16 = parts.next()?.parse().ok()?;

    Some(match code {
        100..=179 => TransferProgress::Trying,
        180..=199 => TransferProgress::Ringing,
        200..=299 => TransferProgress::Succeeded,
        _ => TransferProgress::Failed(code.into()),
    })
}

fn escape_uri_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'@' | b';' | b'=' | b':' | b'?' | b'&' | b' ' => {
                out.push_str(&format!("%{byte:02X}"));
            }
            _ => out.push(byte as char),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sipfrag_lines() {
        assert_eq!(
            parse_sipfrag(&Bytes::from_static(b"SIP/2.0 100 Trying\r\n")),
            Some(TransferProgress::Trying)
        );
        assert_eq!(
            parse_sipfrag(&Bytes::from_static(b"SIP/2.0 180 Ringing\r\n")),
            Some(TransferProgress::Ringing)
        );
        assert_eq!(
            parse_sipfrag(&Bytes::from_static(b"SIP/2.0 200 OK\r\n")),
            Some(TransferProgress::Succeeded)
        );
        assert_eq!(
            parse_sipfrag(&Bytes::from_static(b"SIP/2.0 486 Busy Here\r\n")),
            Some(TransferProgress::Failed(StatusCode::BusyHere))
        );
        assert_eq!(parse_sipfrag(&Bytes::from_static(b"not sip")), None);
    }

    #[test]
    fn test_escape_uri_header() {
        assert_eq!(
            escape_uri_header("12345@host;to-tag=a"),
            "12345%40host%3Bto-tag%3Da"
        );
    }
}
