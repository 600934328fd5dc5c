use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RecordType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;

use aegis_geodns::dns::{DnsConfig, DnsServer, MemoryStore, RequestHandler, Store, TrafficSteering};

async fn start_server() -> (SocketAddr, SocketAddr) {
    let store = Arc::new(MemoryStore::new());
    store
        .hset("example.net.", "@", r#"{"soa":{"ns":"ns1.example.net.","MBox":"admin.example.net.","refresh":44,"retry":55,"expire":66,"minttl":100}}"#)
        .await
        .unwrap();
    store
        .hset("example.net.", "www", r#"{"a":[{"ip":"10.1.1.1"},{"ip":"10.1.1.2"}],"aaaa":[{"ip":"2001:db8::10"}]}"#)
        .await
        .unwrap();
    store
        .hset("example.net.", "*.svc", r#"{"txt":[{"text":"wildcard"}]}"#)
        .await
        .unwrap();

    let config = DnsConfig::default();
    let handler = Arc::new(RequestHandler::new(config.handler.clone(), store).await.unwrap());
    let server = Arc::new(DnsServer::new(config, handler, Arc::new(TrafficSteering::passthrough())).unwrap());

    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addrs = (udp.local_addr().unwrap(), tcp.local_addr().unwrap());

    tokio::spawn(server.serve(udp, tcp));
    addrs
}

fn query(id: u16, name: &str, qtype: RecordType) -> Vec<u8> {
    let mut query = Message::new();
    query.set_id(id);
    query.set_message_type(MessageType::Query);
    query.set_op_code(OpCode::Query);
    query.set_recursion_desired(true);
    query.add_query(Query::query(Name::from_ascii(name).unwrap(), qtype));
    query.to_vec().unwrap()
}

async fn udp_exchange(server: SocketAddr, bytes: &[u8]) -> Message {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(bytes, server).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let (len, _) = timeout(Duration::from_secs(5), client.recv_from(&mut buf))
        .await
        .expect("no UDP response")
        .unwrap();
    Message::from_vec(&buf[..len]).unwrap()
}

#[tokio::test]
async fn test_udp_a_query() {
    let (udp, _) = start_server().await;
    let response = udp_exchange(udp, &query(42, "www.example.net.", RecordType::A)).await;

    assert_eq!(response.id(), 42);
    assert_eq!(response.message_type(), MessageType::Response);
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(response.authoritative());
    assert!(!response.recursion_available());
    assert_eq!(response.answers().len(), 2);
    assert!(response.answers().iter().all(|rr| rr.record_type() == RecordType::A));
    assert!(response.answers().iter().all(|rr| rr.ttl() == 360));
}

#[tokio::test]
async fn test_udp_wildcard_and_case_insensitive() {
    let (udp, _) = start_server().await;
    let response = udp_exchange(udp, &query(7, "Foo.SVC.Example.NET.", RecordType::TXT)).await;

    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert_eq!(response.answers().len(), 1);
    assert_eq!(response.answers()[0].record_type(), RecordType::TXT);
}

#[tokio::test]
async fn test_udp_nxdomain_carries_stored_soa() {
    let (udp, _) = start_server().await;
    let response = udp_exchange(udp, &query(8, "missing.example.net.", RecordType::A)).await;

    assert_eq!(response.response_code(), ResponseCode::NXDomain);
    assert_eq!(response.name_servers().len(), 1);
    let soa = &response.name_servers()[0];
    assert_eq!(soa.record_type(), RecordType::SOA);
    assert_eq!(soa.name().to_string(), "example.net.");
    assert_eq!(soa.ttl(), 360);
}

#[tokio::test]
async fn test_udp_outside_any_zone() {
    let (udp, _) = start_server().await;
    let response = udp_exchange(udp, &query(9, "www.example.org.", RecordType::A)).await;

    assert_eq!(response.response_code(), ResponseCode::NXDomain);
    assert!(response.answers().is_empty());
}

#[tokio::test]
async fn test_tcp_multiple_queries_on_one_connection() {
    let (_, tcp) = start_server().await;
    let mut stream = TcpStream::connect(tcp).await.unwrap();

    for (id, qtype, expected) in [(1u16, RecordType::A, 2usize), (2, RecordType::AAAA, 1)] {
        let bytes = query(id, "www.example.net.", qtype);
        stream.write_all(&(bytes.len() as u16).to_be_bytes()).await.unwrap();
        stream.write_all(&bytes).await.unwrap();

        let mut len_buf = [0u8; 2];
        timeout(Duration::from_secs(5), stream.read_exact(&mut len_buf))
            .await
            .expect("no TCP response")
            .unwrap();
        let mut msg = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut msg).await.unwrap();

        let response = Message::from_vec(&msg).unwrap();
        assert_eq!(response.id(), id);
        assert_eq!(response.answers().len(), expected);
        assert_eq!(response.answers()[0].record_type(), qtype);
    }
}
