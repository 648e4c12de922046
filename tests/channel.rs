use std::{
    io::Cursor,
    sync::{Arc, Mutex},
    thread::{self, ThreadId},
};

use xfer::{
    Error, Status,
    protocol::{
        Channel, ChunkInfo, Dispatcher, DispatcherConfig, Frame, FrameTransport, Response,
    },
};

type Seen = Arc<Mutex<Vec<(u16, ThreadId, Result<Option<Response>, String>)>>>;

fn recorder(seen: &Seen, tag: u16) -> Box<dyn xfer::protocol::ResponseHandler> {
    let seen = Arc::clone(seen);
    Box::new(move |status: Status, response: Option<Response>| {
        let outcome = status.map(|_| response).map_err(|e| e.to_string());
        seen.lock()
            .unwrap()
            .push((tag, thread::current().id(), outcome));
    })
}

#[test]
fn answers_reach_handlers_off_the_reader_thread() {
    let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()).unwrap());
    let channel = Channel::new(Arc::clone(&dispatcher));
    let seen: Seen = Arc::default();

    let first = channel.send(recorder(&seen, 1)).unwrap();
    let second = channel.send(recorder(&seen, 2)).unwrap();
    let third = channel.send(recorder(&seen, 3)).unwrap();
    assert_eq!((first, second, third), (0, 1, 2));

    // Answers arrive out of order.
    let mut transport = FrameTransport::new(Cursor::new(Vec::new()));
    transport
        .write_frame(&Frame::ok(
            second,
            Some(Response::Chunk(ChunkInfo::new(0, b"abc".to_vec()))),
        ))
        .unwrap();
    transport.write_frame(&Frame::error(third, 3011, "no such file")).unwrap();
    transport.write_frame(&Frame::ok(first, None)).unwrap();
    transport.get_mut().set_position(0);

    let frames = channel.pump(&mut transport).unwrap();
    assert_eq!(frames, 3);

    let sids = Arc::clone(channel.sids());
    drop(channel);
    drop(dispatcher);

    let reader = thread::current().id();
    let mut seen = seen.lock().unwrap();
    seen.sort_by_key(|(tag, _, _)| *tag);
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|(_, thread, _)| *thread != reader));

    assert!(matches!(seen[0].2, Ok(None)));
    match &seen[1].2 {
        Ok(Some(Response::Chunk(chunk))) => assert_eq!(chunk.buffer, b"abc"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(seen[2].2.as_ref().unwrap_err().contains("no such file"));

    assert_eq!(sids.outstanding(), 0);
}

#[test]
fn corrupt_stream_fails_pending_requests() {
    let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()).unwrap());
    let channel = Channel::new(Arc::clone(&dispatcher));
    let seen: Seen = Arc::default();

    let id = channel.send(recorder(&seen, 1)).unwrap();
    channel.send(recorder(&seen, 2)).unwrap();

    let mut transport = FrameTransport::new(Cursor::new(Vec::new()));
    transport.write_frame(&Frame::ok(id, None)).unwrap();
    // Stream id followed by a body tag no peer would send.
    transport
        .get_mut()
        .get_mut()
        .extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x09]);
    transport.get_mut().set_position(0);

    let res = channel.pump(&mut transport);
    assert!(matches!(res, Err(Error::Deserialize(_))));
    assert_eq!(channel.in_flight(), 0);

    let sids = Arc::clone(channel.sids());
    drop(channel);
    drop(dispatcher);

    let mut seen = seen.lock().unwrap();
    seen.sort_by_key(|(tag, _, _)| *tag);
    assert_eq!(seen.len(), 2);
    assert!(matches!(seen[0].2, Ok(None)));
    assert!(seen[1].2.as_ref().unwrap_err().starts_with("connection broken"));
    assert_eq!(sids.free_count(), 2);
}

#[test]
fn oversized_frame_fails_pending_requests() {
    let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()).unwrap());
    let channel = Channel::new(Arc::clone(&dispatcher));
    let seen: Seen = Arc::default();
    let id = channel.send(recorder(&seen, 1)).unwrap();

    // An Ok frame whose buffer claims a terabyte.
    let mut bytes = id.to_be_bytes().to_vec();
    bytes.extend_from_slice(&[0, 0, 0, 0, 1, 0, 0, 0, 1]);
    bytes.extend_from_slice(&(1u64 << 40).to_be_bytes());
    let mut transport = FrameTransport::new(Cursor::new(bytes));

    let res = channel.pump(&mut transport);
    assert!(matches!(res, Err(Error::Deserialize(_))));

    let sids = Arc::clone(channel.sids());
    drop(channel);
    drop(dispatcher);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].2.as_ref().unwrap_err().starts_with("connection broken"));
    assert_eq!(sids.outstanding(), 0);
}
