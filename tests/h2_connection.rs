//! HTTP/2 connection handle driven against a scripted peer over an
//! in-memory pipe.

use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use mimic::transport::h2::{
    request_headers, trailer_fields, EncodeOptions, H2Connection, H2Options, HeaderList,
};
use mimic::{Error, Http2Settings, Request};

mod helpers;
use helpers::mock_h2_server::{
    MockH2Connection, DATA, GOAWAY, RST_STREAM, SETTINGS, WINDOW_UPDATE,
};

const OPTS: EncodeOptions<'static> = EncodeOptions {
    default_user_agent: "mimic-test/1",
    allow_invalid_header_values: false,
    add_gzip: false,
};

fn connect() -> (H2Connection, MockH2Connection) {
    connect_with(H2Options::default())
}

fn connect_with(options: H2Options) -> (H2Connection, MockH2Connection) {
    let (client, server) = tokio::io::duplex(1 << 20);
    let conn = H2Connection::handshake(client, Http2Settings::default(), options);
    (conn, MockH2Connection::from_stream(server))
}

fn get(headers: &[(&str, &str)]) -> HeaderList {
    let mut req = Request::get("https://example.test/resource").unwrap();
    for (name, value) in headers {
        req = req.header(*name, *value);
    }
    request_headers(&req, &OPTS).unwrap()
}

#[tokio::test]
async fn test_client_preface_carries_settings() {
    let (conn, server) = connect();
    let settings = server.handshake(&[]).await.unwrap();
    let expected = Http2Settings::default().to_frame_settings();
    assert_eq!(settings, expected);

    // the connection-level WINDOW_UPDATE follows the SETTINGS frame
    let update = server.read_frame().await.unwrap();
    assert_eq!(update.frame_type, WINDOW_UPDATE);
    assert_eq!(update.stream_id, 0);
    assert_eq!(
        u32::from_be_bytes(update.payload[..4].try_into().unwrap()),
        Http2Settings::default().connection_window_increment
    );
    assert!(conn.is_usable());
}

#[tokio::test]
async fn test_response_with_body_and_trailers() {
    helpers::init_tracing();
    let (conn, server) = connect();

    let peer = tokio::spawn(async move {
        server.handshake(&[]).await.unwrap();
        let (id, fields, _, end_stream) = server.read_request_headers().await.unwrap();
        server.send_headers(id, &[(":status", "200"), ("x-first", "1")], false).await.unwrap();
        server.send_data(id, b"hello ", false).await.unwrap();
        server.send_data(id, b"world", false).await.unwrap();
        server.send_headers(id, &[("grpc-status", "0")], true).await.unwrap();
        (id, fields, end_stream)
    });

    let resp = conn
        .send(get(&[("accept", "*/*")]), Bytes::new(), None, None, None)
        .await
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.headers.get("x-first"), Some("1"));
    assert_eq!(resp.body.as_ref(), b"hello world");
    assert_eq!(resp.trailers.get("grpc-status"), Some("0"));

    let (id, fields, end_stream) = peer.await.unwrap();
    assert_eq!(id, 1);
    assert!(end_stream);
    let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        [":authority", ":method", ":path", ":scheme", "accept", "user-agent"]
    );
}

#[tokio::test]
async fn test_request_body_and_trailers() {
    let (conn, server) = connect();

    let peer = tokio::spawn(async move {
        server.handshake(&[]).await.unwrap();
        let (id, fields, _, end_stream) = server.read_request_headers().await.unwrap();
        assert!(!end_stream);
        let data = server.next_stream_frame().await.unwrap();
        assert_eq!(data.frame_type, DATA);
        assert_eq!(data.flags & 0x1, 0, "body must not end the stream before trailers");
        let (_, trailers, _, trailers_end) = server.read_request_headers().await.unwrap();
        assert!(trailers_end);
        server.respond(id, b"ok").await.unwrap();
        (fields, data.payload, trailers)
    });

    let req = Request::post("https://example.test/upload", "hello")
        .unwrap()
        .trailer("X-Checksum", "abc");
    let fields = request_headers(&req, &OPTS).unwrap();
    let resp = conn
        .send(fields, req.body.clone(), Some(trailer_fields(&req)), None, None)
        .await
        .unwrap();
    assert_eq!(resp.body.as_ref(), b"ok");

    let (fields, body, trailers) = peer.await.unwrap();
    assert!(fields.contains(&("trailer".to_string(), "x-checksum".to_string())));
    assert!(fields.contains(&("content-length".to_string(), "5".to_string())));
    assert_eq!(body.as_ref(), b"hello");
    assert_eq!(trailers, vec![("x-checksum".to_string(), "abc".to_string())]);
}

#[tokio::test]
async fn test_cancel_resets_stream_and_returns_credit() {
    let (conn, server) = connect();
    server.handshake(&[]).await.unwrap();
    let before = conn.flow_snapshot().await.unwrap();

    let token = CancellationToken::new();
    let pending = tokio::spawn({
        let conn = conn.clone();
        let token = token.clone();
        async move {
            conn.send(get(&[]), Bytes::new(), None, Some(&token), None)
                .await
        }
    });

    let (id, _, _, _) = server.read_request_headers().await.unwrap();
    server.send_headers(id, &[(":status", "200")], false).await.unwrap();
    server.send_data(id, &[0u8; 1000], false).await.unwrap();

    // wait until the driver has counted the DATA frame
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snap = conn.flow_snapshot().await.unwrap();
            if snap.conn_recv_window == before.conn_recv_window - 1000 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("DATA frame never accounted");

    token.cancel();
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Canceled));

    let rst = loop {
        let frame = server.read_frame().await.unwrap();
        if frame.frame_type != SETTINGS {
            break frame;
        }
    };
    assert_eq!(rst.frame_type, RST_STREAM);
    assert_eq!(rst.stream_id, id);
    assert_eq!(rst.payload.as_ref(), &8u32.to_be_bytes());

    let update = server.read_frame().await.unwrap();
    assert_eq!(update.frame_type, WINDOW_UPDATE);
    assert_eq!(update.stream_id, 0);
    assert_eq!(update.payload.as_ref(), &1000u32.to_be_bytes());

    let after = conn.flow_snapshot().await.unwrap();
    assert_eq!(after.conn_recv_window, before.conn_recv_window);
    assert_eq!(after.conn_send_window, before.conn_send_window);
    assert_eq!(after.open_streams, 0);
    assert!(conn.is_usable());
}

#[tokio::test]
async fn test_peer_reset_is_reported() {
    let (conn, server) = connect();
    let peer = tokio::spawn(async move {
        server.handshake(&[]).await.unwrap();
        let (id, _, _, _) = server.read_request_headers().await.unwrap();
        server.send_rst_stream(id, 0x2).await.unwrap();
        server
    });

    let err = conn
        .send(get(&[]), Bytes::new(), None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PeerReset { stream_id: 1, code: 2 }));
    let _server = peer.await.unwrap();
    assert!(conn.is_usable());
}

#[tokio::test]
async fn test_oversized_header_list_never_reaches_the_wire() {
    let (conn, server) = connect();
    let peer = tokio::spawn(async move {
        server.handshake(&[(0x6, 1024)]).await.unwrap();
        let (id, fields, _, _) = server.read_request_headers().await.unwrap();
        server.respond(id, b"small").await.unwrap();
        (id, fields)
    });

    let big = "x".repeat(2000);
    let err = conn
        .send(get(&[("x-big", big.as_str())]), Bytes::new(), None, None, None)
        .await
        .unwrap_err();
    match err {
        Error::MaxHeaderListSizeExceeded { size, limit } => {
            assert_eq!(limit, 1024);
            assert!(size > 2000);
        }
        other => panic!("expected MaxHeaderListSizeExceeded, got {other:?}"),
    }

    let resp = conn
        .send(get(&[("x-small", "1")]), Bytes::new(), None, None, None)
        .await
        .unwrap();
    assert_eq!(resp.body.as_ref(), b"small");

    // the rejected request consumed no stream id and no HPACK state
    let (id, fields) = peer.await.unwrap();
    assert_eq!(id, 1);
    assert!(fields.iter().any(|(n, _)| n == "x-small"));
    assert!(!fields.iter().any(|(n, _)| n == "x-big"));
}

#[tokio::test]
async fn test_concurrent_header_blocks_are_not_interleaved() {
    const STREAMS: usize = 8;
    let (conn, server) = connect();

    let peer = tokio::spawn(async move {
        server.handshake(&[]).await.unwrap();
        let mut seen = Vec::new();
        for _ in 0..STREAMS {
            // panics if another stream's frame lands inside a header block
            let (id, fields, frames, _) = server.read_request_headers().await.unwrap();
            assert!(frames.len() > 1, "large block should need CONTINUATION");
            let big = fields
                .iter()
                .find(|(n, _)| n == "x-big")
                .map(|(_, v)| v.clone())
                .unwrap();
            seen.push((id, big));
        }
        for (id, big) in seen.iter().rev() {
            server.respond(*id, &big.as_bytes()[..1]).await.unwrap();
        }
        seen.len()
    });

    let mut handles = Vec::new();
    for i in 0..STREAMS {
        let conn = conn.clone();
        handles.push(tokio::spawn(async move {
            let letter = (b'a' + i as u8) as char;
            let value = letter.to_string().repeat(40_000);
            let resp = conn
                .send(get(&[("x-big", value.as_str())]), Bytes::new(), None, None, None)
                .await
                .unwrap();
            assert_eq!(resp.body.as_ref(), letter.to_string().as_bytes());
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(peer.await.unwrap(), STREAMS);
}

#[tokio::test]
async fn test_goaway_fails_streams_above_last_id() {
    let (conn, server) = connect();
    let peer = tokio::spawn(async move {
        server.handshake(&[]).await.unwrap();
        server.read_request_headers().await.unwrap();
        server.send_goaway(0, 0).await.unwrap();
        server
    });

    let err = conn
        .send(get(&[]), Bytes::new(), None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GoAway { last_stream_id: 0, code: 0 }));
    assert!(!conn.is_usable());

    let _server = peer.await.unwrap();
    assert!(conn.send(get(&[]), Bytes::new(), None, None, None).await.is_err());
}

#[tokio::test]
async fn test_goaway_lets_accepted_streams_finish() {
    let (conn, server) = connect();
    let peer = tokio::spawn(async move {
        server.handshake(&[]).await.unwrap();
        let (id, _, _, _) = server.read_request_headers().await.unwrap();
        server.send_goaway(id, 0).await.unwrap();
        server.respond(id, b"done").await.unwrap();
        server
    });

    let resp = conn
        .send(get(&[]), Bytes::new(), None, None, None)
        .await
        .unwrap();
    assert_eq!(resp.body.as_ref(), b"done");
    assert!(!conn.is_usable());
    let _server = peer.await.unwrap();
}

#[tokio::test]
async fn test_response_timeout_resets_stream() {
    let (conn, server) = connect();
    server.handshake(&[]).await.unwrap();

    let send = conn.send(
        get(&[]),
        Bytes::new(),
        None,
        None,
        Some(Duration::from_millis(100)),
    );
    let (result, headers) = tokio::join!(send, server.read_request_headers());
    assert!(matches!(result, Err(Error::Timeout(_))));

    let (id, _, _, _) = headers.unwrap();
    let rst = server.next_stream_frame().await.unwrap();
    assert_eq!(rst.frame_type, RST_STREAM);
    assert_eq!(rst.stream_id, id);
}

#[tokio::test]
async fn test_idle_connection_sends_goaway() {
    let (conn, server) = connect_with(H2Options {
        idle_timeout: Some(Duration::from_millis(200)),
        ..H2Options::default()
    });
    let peer = tokio::spawn(async move {
        server.handshake(&[]).await.unwrap();
        let (id, _, _, _) = server.read_request_headers().await.unwrap();
        server.respond(id, b"ok").await.unwrap();
        server.next_stream_frame().await.unwrap()
    });

    let resp = conn
        .send(get(&[]), Bytes::new(), None, None, None)
        .await
        .unwrap();
    assert_eq!(resp.body.as_ref(), b"ok");

    let goaway = tokio::time::timeout(Duration::from_secs(5), peer)
        .await
        .expect("no GOAWAY after the idle timeout")
        .unwrap();
    assert_eq!(goaway.frame_type, GOAWAY);
    assert_eq!(goaway.stream_id, 0);
    assert_eq!(goaway.payload[4..8], 0u32.to_be_bytes(), "NO_ERROR");
    assert!(!conn.is_usable());
    assert!(conn.send(get(&[]), Bytes::new(), None, None, None).await.is_err());
}

#[tokio::test]
async fn test_early_response_stops_request_body_with_no_error() {
    let (conn, server) = connect();
    let peer = tokio::spawn(async move {
        server.handshake(&[]).await.unwrap();
        let (id, _, _, end_stream) = server.read_request_headers().await.unwrap();
        assert!(!end_stream);
        // answer while the body is still blocked on the default windows
        server.respond(id, b"early").await.unwrap();
        loop {
            let frame = server.next_stream_frame().await.unwrap();
            if frame.frame_type == RST_STREAM {
                break (id, frame);
            }
            assert_eq!(frame.frame_type, DATA);
            assert_eq!(frame.flags & 0x1, 0);
        }
    });

    let req = Request::post("https://example.test/upload", vec![7u8; 100_000]).unwrap();
    let fields = request_headers(&req, &OPTS).unwrap();
    let resp = conn
        .send(fields, req.body.clone(), None, None, None)
        .await
        .unwrap();
    assert_eq!(resp.body.as_ref(), b"early");

    let (id, rst) = peer.await.unwrap();
    assert_eq!(rst.stream_id, id);
    assert_eq!(rst.payload.as_ref(), &0u32.to_be_bytes());
    assert_eq!(conn.flow_snapshot().await.unwrap().open_streams, 0);
}

#[tokio::test]
async fn test_oversized_response_body_resets_stream() {
    let (conn, server) = connect_with(H2Options {
        max_body_size: 16,
        ..H2Options::default()
    });
    server.handshake(&[]).await.unwrap();
    let before = conn.flow_snapshot().await.unwrap();

    let send = conn.send(get(&[]), Bytes::new(), None, None, None);
    let script = async {
        let (id, _, _, _) = server.read_request_headers().await.unwrap();
        server.send_headers(id, &[(":status", "200")], false).await.unwrap();
        server.send_data(id, &[b'x'; 32], false).await.unwrap();
        id
    };
    let (result, id) = tokio::join!(send, script);
    assert!(matches!(result, Err(Error::HttpProtocol(_))), "got {result:?}");

    let rst = server.next_stream_frame().await.unwrap();
    assert_eq!(rst.frame_type, RST_STREAM);
    assert_eq!(rst.stream_id, id);
    assert_eq!(rst.payload.as_ref(), &8u32.to_be_bytes());

    let after = conn.flow_snapshot().await.unwrap();
    assert_eq!(after.conn_recv_window, before.conn_recv_window);
    assert_eq!(after.open_streams, 0);
    assert!(conn.is_usable());
}
