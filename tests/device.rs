//! Integration tests for the XBee device.
//!
//! A simulated module sits on the other end of an in-memory duplex stream,
//! decodes the frames the device writes and answers them.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::Instant;
use xbee::{
    ApiFrame, ApiFrameType, AtCommand, DeliveryStatus, DeviceConfig, Error, Event, FrameDecoder,
    IpProtocol, ModemStatus, NodeRole, OperatingMode, StreamTransport, XBee64BitAddress,
    XBeeDevice, XBeeProtocol,
};

type Device = XBeeDevice<StreamTransport<DuplexStream>>;

/// What the simulated module does with a decoded frame.
/// `None` hangs up the connection.
type Reply = Option<Vec<ApiFrame>>;

const NODE_A: u64 = 0x0013_A200_4052_2BAA;
const NODE_B: u64 = 0x0013_A200_4052_2BBB;
const UNREACHABLE: u64 = 0x0013_A200_0000_0BAD;

struct FakeModule {
    writer: Arc<Mutex<Option<WriteHalf<DuplexStream>>>>,
    escaped: bool,
}

impl FakeModule {
    fn spawn(
        stream: DuplexStream,
        escaped: bool,
        mut respond: impl FnMut(&ApiFrame) -> Reply + Send + 'static,
    ) -> Self {
        let (mut reader, writer) = tokio::io::split(stream);
        let writer = Arc::new(Mutex::new(Some(writer)));
        let task_writer = Arc::clone(&writer);

        tokio::spawn(async move {
            let mut decoder = FrameDecoder::with_escaping(escaped);
            let mut buf = vec![0u8; 512];
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                decoder.feed(&buf[..n]);
                loop {
                    let frame = match decoder.decode() {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break,
                        Err(_) => continue,
                    };
                    let Some(replies) = respond(&frame) else {
                        // Dropping both halves closes the stream
                        task_writer.lock().await.take();
                        return;
                    };
                    let mut guard = task_writer.lock().await;
                    let Some(writer) = guard.as_mut() else { return };
                    for reply in replies {
                        writer
                            .write_all(&reply.encode(escaped).unwrap())
                            .await
                            .unwrap();
                    }
                }
            }
        });

        Self { writer, escaped }
    }

    async fn inject(&self, bytes: &[u8]) {
        if let Some(writer) = self.writer.lock().await.as_mut() {
            writer.write_all(bytes).await.unwrap();
        }
    }

    async fn send(&self, frame: &ApiFrame) {
        self.inject(&frame.encode(self.escaped).unwrap()).await;
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config() -> DeviceConfig {
    DeviceConfig::default()
        .receive_timeout(Duration::from_secs(1))
        .mode_query_timeout(Duration::from_millis(200))
        .mode_query_attempts(1)
        .guard_time(Duration::from_millis(10))
}

fn at_command(frame: &ApiFrame) -> Option<[u8; 2]> {
    if frame.kind() != Some(ApiFrameType::AtCommand) {
        return None;
    }
    let data = frame.data();
    Some([data[1], data[2]])
}

fn at_response(request: &ApiFrame, status: u8, value: &[u8]) -> ApiFrame {
    let data = request.data();
    let mut payload = vec![data[0], data[1], data[2], status];
    payload.extend_from_slice(value);
    ApiFrame::new(ApiFrameType::AtCommandResponse, payload)
}

fn receive_packet(source: u64, data: &[u8]) -> ApiFrame {
    let mut payload = source.to_be_bytes().to_vec();
    payload.extend_from_slice(&[0xFF, 0xFE, 0x01]);
    payload.extend_from_slice(data);
    ApiFrame::new(ApiFrameType::ReceivePacket, payload)
}

fn discovered_node(address: u64, my: u16, node_id: &str, device_type: u8) -> Vec<u8> {
    let mut value = my.to_be_bytes().to_vec();
    value.extend_from_slice(&address.to_be_bytes());
    value.extend_from_slice(node_id.as_bytes());
    value.extend_from_slice(&[0x00, 0xFF, 0xFE, device_type]);
    value
}

/// Answers the frames a typical ZigBee module would.
fn standard_reply(frame: &ApiFrame) -> Reply {
    if let Some(command) = at_command(frame) {
        let value: &[u8] = match &command {
            b"NI" => b"XBEE",
            b"SH" => &[0x00, 0x13, 0xA2, 0x00],
            b"SL" => &[0x40, 0x52, 0x2B, 0xAA],
            b"HV" => &[0x1E, 0x42],
            b"VR" => &[0x10, 0x0A],
            b"MY" => &[0x00, 0x00],
            _ => &[],
        };
        return Some(vec![at_response(frame, 0x00, value)]);
    }

    match frame.kind() {
        Some(ApiFrameType::TransmitRequest) => {
            let data = frame.data();
            // Frame ID 0 asks for no status
            if data[0] == 0 {
                return Some(vec![]);
            }
            let destination = u64::from_be_bytes(data[1..9].try_into().unwrap());
            let delivery = if destination == UNREACHABLE { 0x21 } else { 0x00 };
            Some(vec![ApiFrame::new(
                ApiFrameType::TransmitStatus,
                vec![data[0], 0xFF, 0xFE, 0x00, delivery, 0x00],
            )])
        }
        Some(ApiFrameType::RemoteAtCommand) => {
            let data = frame.data();
            let mut payload = vec![data[0]];
            payload.extend_from_slice(&data[1..11]);
            payload.extend_from_slice(&data[12..14]);
            payload.push(0x00);
            payload.extend_from_slice(b"REMOTE");
            Some(vec![ApiFrame::new(
                ApiFrameType::RemoteAtCommandResponse,
                payload,
            )])
        }
        _ => Some(vec![]),
    }
}

/// Answers `AP` with `ap` and everything else with `respond`.
fn api_module(
    ap: u8,
    mut respond: impl FnMut(&ApiFrame) -> Reply + Send + 'static,
) -> impl FnMut(&ApiFrame) -> Reply + Send + 'static {
    move |frame: &ApiFrame| match at_command(frame) {
        Some(command) if &command == b"AP" => Some(vec![at_response(frame, 0x00, &[ap])]),
        _ => respond(frame),
    }
}

async fn open_device(
    config: DeviceConfig,
    escaped: bool,
    respond: impl FnMut(&ApiFrame) -> Reply + Send + 'static,
) -> (Device, FakeModule, xbee::Result<OperatingMode>) {
    init_tracing();
    let (local, remote) = tokio::io::duplex(4096);
    let module = FakeModule::spawn(remote, escaped, respond);
    let mut device = XBeeDevice::new(StreamTransport::new(local), config);
    let opened = device.open().await;
    (device, module, opened)
}

async fn open_api_device(
    respond: impl FnMut(&ApiFrame) -> Reply + Send + 'static,
) -> (Device, FakeModule) {
    let (device, module, opened) = open_device(test_config(), false, api_module(1, respond)).await;
    assert_eq!(opened.unwrap(), OperatingMode::Api);
    (device, module)
}

// ==================== Operating mode ====================

#[tokio::test]
async fn test_detects_api_mode() {
    let (device, _module) = open_api_device(standard_reply).await;
    assert_eq!(device.operating_mode(), OperatingMode::Api);
    assert!(device.is_open().await);
}

#[tokio::test]
async fn test_detects_escaped_api_mode() {
    let (device, _module, opened) = open_device(test_config(), true, api_module(2, |frame| {
        match at_command(frame) {
            // Reserved bytes in the value must survive the escaping
            Some(command) if &command == b"NI" => {
                Some(vec![at_response(frame, 0x00, &[0x7E, 0x7D, 0x11, 0x13])])
            }
            _ => standard_reply(frame),
        }
    }))
    .await;

    assert_eq!(opened.unwrap(), OperatingMode::ApiEscaped);
    let value = device.get_parameter(AtCommand::NI).await.unwrap();
    assert_eq!(&value[..], &[0x7E, 0x7D, 0x11, 0x13]);
}

#[tokio::test]
async fn test_redetect_keeps_escaped_framing() {
    let (mut device, _module, opened) = open_device(test_config(), true, api_module(2, |frame| {
        match at_command(frame) {
            Some(command) if &command == b"NI" => {
                Some(vec![at_response(frame, 0x00, &[0x7E, 0x13])])
            }
            _ => standard_reply(frame),
        }
    }))
    .await;
    assert_eq!(opened.unwrap(), OperatingMode::ApiEscaped);

    let mode = device.detect_operating_mode().await.unwrap();
    assert_eq!(mode, OperatingMode::ApiEscaped);
    assert_eq!(device.operating_mode(), OperatingMode::ApiEscaped);
    let value = device.get_parameter(AtCommand::NI).await.unwrap();
    assert_eq!(&value[..], &[0x7E, 0x13]);
}

#[tokio::test(start_paused = true)]
async fn test_silent_module_is_unknown() {
    let (device, _module, opened) = open_device(test_config(), false, |_| Some(vec![])).await;

    assert!(matches!(
        opened,
        Err(Error::InvalidOperatingMode {
            mode: OperatingMode::Unknown
        })
    ));
    assert_eq!(device.operating_mode(), OperatingMode::Unknown);
    // Still open so detection can be retried
    assert!(device.is_open().await);

    assert!(matches!(
        device.get_parameter(AtCommand::NI).await,
        Err(Error::InvalidOperatingMode {
            mode: OperatingMode::Unknown
        })
    ));
    assert!(matches!(
        device
            .send_data(XBee64BitAddress::new(NODE_A), &b"hi"[..])
            .await,
        Err(Error::InvalidOperatingMode { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_detects_transparent_mode() {
    let (local, remote) = tokio::io::duplex(4096);
    tokio::spawn(async move {
        let (mut reader, mut writer) = tokio::io::split(remote);
        let mut received = Vec::new();
        let mut buf = [0u8; 256];
        while let Ok(n) = reader.read(&mut buf).await {
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
            if received.windows(3).any(|w| w == b"+++") {
                writer.write_all(b"OK\r").await.unwrap();
                received.clear();
            }
        }
    });

    let mut device = XBeeDevice::new(StreamTransport::new(local), test_config());
    let mut events = device.subscribe();
    let opened = device.open().await;

    assert!(matches!(
        opened,
        Err(Error::InvalidOperatingMode {
            mode: OperatingMode::At
        })
    ));
    assert_eq!(device.operating_mode(), OperatingMode::At);
    assert!(matches!(events.recv().await, Some(Event::Connected)));
}

// ==================== Correlation ====================

#[tokio::test]
async fn test_node_identifier_with_frame_id_0x52() {
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let (device, _module) = open_api_device(move |frame| {
        if at_command(frame) == Some(*b"NI") {
            record.lock().unwrap().push(frame.frame_id().unwrap());
        }
        standard_reply(frame)
    })
    .await;

    // Detection took ID 1, these take 2 through 0x51
    for _ in 2..0x52 {
        device.apply_changes().await.unwrap();
    }

    let value = device.get_parameter(AtCommand::NI).await.unwrap();
    assert_eq!(&value[..], b"XBEE");
    assert_eq!(*seen.lock().unwrap(), vec![0x52]);
}

#[tokio::test]
async fn test_concurrent_requests_with_interleaved_responses() {
    const CALLERS: usize = 8;

    let mut held = Vec::new();
    let (device, _module) = open_api_device(move |frame| {
        held.push(frame.clone());
        if held.len() < CALLERS {
            return Some(vec![]);
        }
        // Answer in reverse order, echoing the command name as the value
        Some(
            held.drain(..)
                .rev()
                .map(|f| at_response(&f, 0x00, &f.data()[1..3]))
                .collect(),
        )
    })
    .await;

    let names: Vec<String> = (0..CALLERS).map(|i| format!("D{i}")).collect();
    let requests = names
        .iter()
        .map(|name| device.get_parameter(AtCommand::new(name).unwrap()));
    let results = join_all(requests).await;

    for (name, result) in names.iter().zip(results) {
        assert_eq!(&result.unwrap()[..], name.as_bytes());
    }
    assert_eq!(device.commands().correlator().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_timeouts_do_not_leak_frame_ids() {
    let (mut device, _module) = open_api_device(|frame| {
        if at_command(frame) == Some(*b"NI") {
            Some(vec![])
        } else {
            standard_reply(frame)
        }
    })
    .await;
    device.set_receive_timeout(Duration::from_millis(100));

    // More than one full cycle of frame IDs
    for _ in 0..300 {
        let started = Instant::now();
        let result = device.get_parameter(AtCommand::NI).await;
        assert!(matches!(result, Err(Error::Timeout { timeout_ms: 100 })));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    assert_eq!(device.commands().correlator().pending_count(), 0);
    let value = device.get_parameter(AtCommand::VR).await.unwrap();
    assert_eq!(&value[..], &[0x10, 0x0A]);
}

#[tokio::test]
async fn test_error_status_fails_the_request() {
    let (device, _module) = open_api_device(|frame| {
        if at_command(frame) == Some(*b"ZZ") {
            Some(vec![at_response(frame, 0x02, &[])])
        } else {
            standard_reply(frame)
        }
    })
    .await;

    let result = device.get_parameter(AtCommand::new("ZZ").unwrap()).await;
    assert!(matches!(result, Err(Error::AtCommand { .. })));
    assert_eq!(&device.get_parameter(AtCommand::NI).await.unwrap()[..], b"XBEE");
}

// ==================== Reader ====================

#[tokio::test]
async fn test_corrupted_frame_between_valid_frames() {
    let (device, module) = open_api_device(standard_reply).await;

    let mut stream = receive_packet(NODE_A, b"first").encode(false).unwrap().to_vec();
    let mut corrupt = receive_packet(NODE_A, b"broken").encode(false).unwrap().to_vec();
    corrupt[8] ^= 0x01;
    stream.extend_from_slice(&corrupt);
    stream.extend_from_slice(&receive_packet(NODE_B, b"second").encode(false).unwrap());
    module.inject(&stream).await;

    let first = device.read_data(Duration::from_secs(1)).await.unwrap();
    assert_eq!(&first.data[..], b"first");
    assert_eq!(first.source_64, XBee64BitAddress::new(NODE_A));

    let second = device.read_data(Duration::from_secs(1)).await.unwrap();
    assert_eq!(&second.data[..], b"second");
    assert_eq!(second.source_64, XBee64BitAddress::new(NODE_B));

    // The request path still works afterwards
    assert_eq!(&device.get_parameter(AtCommand::NI).await.unwrap()[..], b"XBEE");
}

#[tokio::test(start_paused = true)]
async fn test_read_data_times_out() {
    let (device, _module) = open_api_device(standard_reply).await;
    assert!(matches!(
        device.read_data(Duration::from_millis(250)).await,
        Err(Error::Timeout { timeout_ms: 250 })
    ));
}

#[tokio::test]
async fn test_unsolicited_frames_reach_subscribers() {
    let (device, module) = open_api_device(standard_reply).await;
    let mut events = device.subscribe();

    module
        .send(&ApiFrame::new(ApiFrameType::ModemStatus, vec![0x02]))
        .await;

    loop {
        match events.recv().await {
            Some(Event::ModemStatus(status)) => {
                assert_eq!(status, ModemStatus::from_byte(0x02));
                break;
            }
            Some(_) => {}
            None => panic!("event stream closed"),
        }
    }
}

#[tokio::test]
async fn test_connection_loss_fails_pending_requests() {
    let (device, _module) = open_api_device(|frame| {
        if at_command(frame) == Some(*b"NI") {
            None
        } else {
            standard_reply(frame)
        }
    })
    .await;
    let mut events = device.subscribe();

    let result = device.get_parameter(AtCommand::NI).await;
    assert!(matches!(result, Err(Error::InterfaceNotOpen)));

    loop {
        match events.recv().await {
            Some(Event::Disconnected) => break,
            Some(_) => {}
            None => panic!("event stream closed"),
        }
    }
    assert!(!device.is_open().await);
    assert_eq!(device.commands().correlator().pending_count(), 0);
    assert!(matches!(
        device.get_parameter(AtCommand::VR).await,
        Err(Error::InterfaceNotOpen)
    ));
}

#[tokio::test]
async fn test_close() {
    let (mut device, _module) = open_api_device(standard_reply).await;
    device.close().await.unwrap();

    assert!(!device.is_open().await);
    assert_eq!(device.operating_mode(), OperatingMode::Unknown);
    assert!(matches!(
        device.get_parameter(AtCommand::NI).await,
        Err(Error::InterfaceNotOpen)
    ));
}

// ==================== Device operations ====================

#[tokio::test]
async fn test_read_device_info() {
    let (device, _module) = open_api_device(standard_reply).await;
    assert!(device.device_info().await.is_none());

    let info = device.read_device_info().await.unwrap();
    assert_eq!(info.address_64, XBee64BitAddress::new(NODE_A));
    assert_eq!(info.node_id, "XBEE");
    assert_eq!(info.hardware_version, 0x1E42);
    assert_eq!(info.firmware_version, 0x100A);
    assert_eq!(info.address_16.map(|a| a.value()), Some(0));
    assert_eq!(device.device_info().await, Some(info));
}

#[tokio::test]
async fn test_send_data_reports_delivery() {
    let (device, _module) = open_api_device(standard_reply).await;

    device
        .send_data(XBee64BitAddress::new(NODE_A), &b"hello"[..])
        .await
        .unwrap();
    device.send_broadcast_data(&b"everyone"[..]).await.unwrap();

    let result = device
        .send_data(XBee64BitAddress::new(UNREACHABLE), &b"hello"[..])
        .await;
    assert!(matches!(
        result,
        Err(Error::Transmit {
            status: DeliveryStatus::NetworkAckFailure
        })
    ));
}

#[tokio::test]
async fn test_send_data_async_requests_no_status() {
    let ids = Arc::new(StdMutex::new(Vec::new()));
    let record = Arc::clone(&ids);
    let (device, _module) = open_api_device(move |frame| {
        if frame.kind() == Some(ApiFrameType::TransmitRequest) {
            record.lock().unwrap().push(frame.frame_id().unwrap());
        }
        standard_reply(frame)
    })
    .await;

    device
        .send_data_async(XBee64BitAddress::new(NODE_A), &b"fire"[..])
        .await
        .unwrap();
    // A synchronous send afterwards proves the async one reached the module
    device
        .send_data(XBee64BitAddress::new(NODE_A), &b"sync"[..])
        .await
        .unwrap();

    let ids = ids.lock().unwrap().clone();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], 0);
    assert_ne!(ids[1], 0);
}

#[tokio::test]
async fn test_remote_parameter() {
    let (device, _module) = open_api_device(standard_reply).await;
    let value = device
        .get_remote_parameter(XBee64BitAddress::new(NODE_B), AtCommand::NI)
        .await
        .unwrap();
    assert_eq!(&value[..], b"REMOTE");

    device
        .set_remote_parameter(XBee64BitAddress::new(NODE_B), AtCommand::NI, &b"NEW"[..])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reset_waits_for_modem_status() {
    let (device, _module) = open_api_device(|frame| {
        if at_command(frame) == Some(*b"FR") {
            Some(vec![
                at_response(frame, 0x00, &[]),
                ApiFrame::new(ApiFrameType::ModemStatus, vec![0x01]),
            ])
        } else {
            standard_reply(frame)
        }
    })
    .await;

    let status = device.reset().await.unwrap();
    assert!(status.is_reset());
}

#[tokio::test(start_paused = true)]
async fn test_discovery_ends_on_empty_response() {
    let (device, _module) = open_api_device(|frame| match at_command(frame).as_ref() {
        // N? = 10 s
        Some(b"N?") => Some(vec![at_response(frame, 0x00, &[0x27, 0x10])]),
        Some(b"ND") => Some(vec![
            at_response(frame, 0x00, &discovered_node(NODE_A, 0x1234, "ROUTER", 1)),
            at_response(frame, 0x00, &discovered_node(NODE_B, 0x5678, "SENSOR", 2)),
            // Duplicate answer from the first node
            at_response(frame, 0x00, &discovered_node(NODE_A, 0x1234, "ROUTER", 1)),
            at_response(frame, 0x00, &[]),
        ]),
        _ => standard_reply(frame),
    })
    .await;

    let started = Instant::now();
    let nodes = device.discover_devices().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));

    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].address_64, XBee64BitAddress::new(NODE_A));
    assert_eq!(nodes[0].address_16.value(), 0x1234);
    assert_eq!(nodes[0].node_id, "ROUTER");
    assert_eq!(nodes[0].role, Some(NodeRole::Router));
    assert_eq!(nodes[1].node_id, "SENSOR");
    assert_eq!(nodes[1].role, Some(NodeRole::EndDevice));
    assert_eq!(device.commands().correlator().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_discovery_runs_until_node_timeout() {
    let (local, remote) = tokio::io::duplex(4096);
    let _module = FakeModule::spawn(
        remote,
        false,
        api_module(1, |frame| match at_command(frame).as_ref() {
            // N? unsupported, NT = 6 s
            Some(b"N?") => Some(vec![at_response(frame, 0x02, &[])]),
            Some(b"NT") => Some(vec![at_response(frame, 0x00, &[0x3C])]),
            Some(b"ND") => Some(vec![at_response(
                frame,
                0x00,
                &discovered_node(NODE_B, 0x0001, "LONELY", 1),
            )]),
            _ => standard_reply(frame),
        }),
    );
    let mut device = XBeeDevice::new(StreamTransport::new(local), test_config());
    device.open().await.unwrap();
    assert_eq!(device.protocol(), XBeeProtocol::ZigBee);

    let started = Instant::now();
    let nodes = device.discover_devices().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(6));
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].node_id, "LONELY");
}

#[tokio::test]
async fn test_ip_data_on_cellular_module() {
    let config = test_config();
    let config = DeviceConfig {
        protocol: XBeeProtocol::Cellular,
        ..config
    };
    let (device, module, opened) = open_device(
        config,
        false,
        api_module(1, |frame| {
            if frame.kind() == Some(ApiFrameType::TxIpv4) {
                // 0x89 TX status: frame ID then delivery status
                Some(vec![ApiFrame::new(
                    ApiFrameType::TxStatus,
                    vec![frame.data()[0], 0x00],
                )])
            } else {
                standard_reply(frame)
            }
        }),
    )
    .await;
    assert_eq!(opened.unwrap(), OperatingMode::Api);

    device
        .send_ip_data(Ipv4Addr::new(52, 1, 2, 3), 8080, IpProtocol::Tcp, &b"GET"[..])
        .await
        .unwrap();

    let mut payload = vec![52, 1, 2, 3, 0x26, 0x16, 0x1F, 0x90, 0x01, 0x00];
    payload.extend_from_slice(b"pong");
    module
        .send(&ApiFrame::new(ApiFrameType::RxIpv4, payload))
        .await;

    let message = device.read_ip_data(Duration::from_secs(1)).await.unwrap();
    assert_eq!(message.source, Ipv4Addr::new(52, 1, 2, 3));
    assert_eq!(message.destination_port, 0x2616);
    assert_eq!(message.source_port, 8080);
    assert_eq!(message.protocol, IpProtocol::Tcp);
    assert_eq!(&message.data[..], b"pong");

    // Radio addressing is not available on IP modules
    assert!(matches!(
        device.send_data(XBee64BitAddress::new(NODE_A), &b"x"[..]).await,
        Err(Error::OperationNotSupported { .. })
    ));
}
