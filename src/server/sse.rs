use axum::response::sse::{ Event, KeepAlive, Sse };
use futures::{ future, Stream, StreamExt };
use log::{ error, info };
use std::convert::Infallible;
use crate::llm::chat::TextStream;

/// One model fragment as one event; each line of the fragment becomes a `data:` line.
pub fn fragment_event(fragment: &str) -> Event {
    let normalized = fragment.replace("\r\n", "\n").replace('\r', "\n");
    Event::default().data(normalized)
}

/// Frames model fragments as server-sent events. An upstream error ends the
/// stream without an error frame.
pub fn into_sse(
    fragments: TextStream,
    label: &'static str
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = fragments
        .scan(0usize, move |count, item| {
            let next = match item {
                Ok(text) => {
                    *count += 1;
                    Some(text)
                }
                Err(e) => {
                    error!("{} stream stopped after {} fragments: {}", label, count, e);
                    None
                }
            };
            future::ready(next)
        })
        .filter(|text| future::ready(!text.is_empty()))
        .map(|text| Ok::<_, Infallible>(fragment_event(&text)));

    info!("Opening {} event stream", label);
    Sse::new(events).keep_alive(KeepAlive::default())
}
