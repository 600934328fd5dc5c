//! AEGIS GeoDNS Server
//!
//! UDP and TCP listeners using Hickory DNS protocol parsing, answering from
//! the store-backed request handler with health and proximity steering.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::handler::RequestHandler;
use super::resolver::Location;
use super::steering::TrafficSteering;
use super::{DnsConfig, DnsError};

/// Maximum EDNS UDP message size
const MAX_EDNS_SIZE: usize = 4096;

/// TCP read timeout
const TCP_TIMEOUT: Duration = Duration::from_secs(10);

/// AEGIS GeoDNS Server
pub struct DnsServer {
    config: DnsConfig,
    handler: Arc<RequestHandler>,
    steering: Arc<TrafficSteering>,
}

impl DnsServer {
    pub fn new(
        config: DnsConfig,
        handler: Arc<RequestHandler>,
        steering: Arc<TrafficSteering>,
    ) -> Result<Self, DnsError> {
        config.validate()?;
        Ok(Self {
            config,
            handler,
            steering,
        })
    }

    /// Bind the configured addresses and serve until a listener fails
    pub async fn run(self: Arc<Self>) -> Result<(), DnsError> {
        info!(
            "Starting AEGIS GeoDNS server on UDP {} and TCP {}",
            self.config.udp_addr, self.config.tcp_addr
        );

        let udp_socket = UdpSocket::bind(&self.config.udp_addr)
            .await
            .map_err(|e| DnsError::ServerError(format!("Failed to bind UDP: {}", e)))?;

        let tcp_listener = TcpListener::bind(&self.config.tcp_addr)
            .await
            .map_err(|e| DnsError::ServerError(format!("Failed to bind TCP: {}", e)))?;

        self.serve(udp_socket, tcp_listener).await
    }

    /// Serve on already bound sockets
    pub async fn serve(self: Arc<Self>, udp_socket: UdpSocket, tcp_listener: TcpListener) -> Result<(), DnsError> {
        info!("DNS server listening");

        tokio::select! {
            result = Arc::clone(&self).run_udp_server(udp_socket) => {
                error!("UDP server stopped: {:?}", result);
                result
            }
            result = Arc::clone(&self).run_tcp_server(tcp_listener) => {
                error!("TCP server stopped: {:?}", result);
                result
            }
        }
    }

    async fn run_udp_server(self: Arc<Self>, socket: UdpSocket) -> Result<(), DnsError> {
        let socket = Arc::new(socket);
        let mut buf = vec![0u8; MAX_EDNS_SIZE];

        loop {
            let (len, addr) = socket
                .recv_from(&mut buf)
                .await
                .map_err(|e| DnsError::ServerError(format!("UDP recv error: {}", e)))?;

            let query_bytes = buf[..len].to_vec();
            let socket = Arc::clone(&socket);
            let server = Arc::clone(&self);

            tokio::spawn(async move {
                if let Err(e) = server.handle_udp_query(&socket, addr, &query_bytes).await {
                    debug!("UDP query error from {}: {}", addr, e);
                }
            });
        }
    }

    async fn handle_udp_query(&self, socket: &UdpSocket, addr: SocketAddr, query_bytes: &[u8]) -> Result<(), DnsError> {
        let query = Message::from_vec(query_bytes)
            .map_err(|e| DnsError::ServerError(format!("Failed to parse query: {}", e)))?;

        let response = self.build_response(&query, addr.ip()).await;

        let response_bytes = response
            .to_vec()
            .map_err(|e| DnsError::ServerError(format!("Failed to serialize response: {}", e)))?;

        socket
            .send_to(&response_bytes, addr)
            .await
            .map_err(|e| DnsError::ServerError(format!("Failed to send response: {}", e)))?;

        Ok(())
    }

    async fn run_tcp_server(self: Arc<Self>, listener: TcpListener) -> Result<(), DnsError> {
        loop {
            let (stream, addr) = listener
                .accept()
                .await
                .map_err(|e| DnsError::ServerError(format!("TCP accept error: {}", e)))?;

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_tcp_connection(stream, addr).await {
                    debug!("TCP connection error from {}: {}", addr, e);
                }
            });
        }
    }

    /// Handle a TCP connection (may include multiple queries)
    async fn handle_tcp_connection(&self, mut stream: TcpStream, addr: SocketAddr) -> Result<(), DnsError> {
        loop {
            // 2-byte length prefix
            let mut len_buf = [0u8; 2];
            match timeout(TCP_TIMEOUT, stream.read_exact(&mut len_buf)).await {
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => break,
            }

            let msg_len = u16::from_be_bytes(len_buf) as usize;
            let mut msg_buf = vec![0u8; msg_len];
            match timeout(TCP_TIMEOUT, stream.read_exact(&mut msg_buf)).await {
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => break,
            }

            let query = match Message::from_vec(&msg_buf) {
                Ok(q) => q,
                Err(e) => {
                    debug!("Failed to parse TCP query from {}: {}", addr, e);
                    continue;
                }
            };

            let response = self.build_response(&query, addr.ip()).await;
            let response_bytes = response
                .to_vec()
                .map_err(|e| DnsError::ServerError(format!("Failed to serialize response: {}", e)))?;
            let len_prefix = (response_bytes.len() as u16).to_be_bytes();

            if stream.write_all(&len_prefix).await.is_err() {
                break;
            }
            if stream.write_all(&response_bytes).await.is_err() {
                break;
            }
        }

        Ok(())
    }

    /// Build the response to a query from `client_ip`
    pub async fn build_response(&self, query: &Message, client_ip: IpAddr) -> Message {
        let mut response = Message::new();
        response.set_id(query.id());
        response.set_message_type(MessageType::Response);
        response.set_op_code(query.op_code());
        response.set_recursion_desired(query.recursion_desired());
        response.set_recursion_available(false);
        response.set_checking_disabled(query.checking_disabled());

        // Only the first question is answered; the rest are ignored
        let Some(question) = query.queries().first() else {
            response.set_response_code(ResponseCode::FormErr);
            return response;
        };
        response.add_query(question.clone());

        if query.op_code() != OpCode::Query {
            response.set_response_code(ResponseCode::NotImp);
            return response;
        }

        self.process_question(&mut response, question, client_ip).await;
        response
    }

    async fn process_question(&self, response: &mut Message, question: &Query, client_ip: IpAddr) {
        let qname = question.name().to_string();
        let qtype = question.query_type();
        debug!("Query {} {} from {}", qname, qtype, client_ip);

        match self.handler.get_record(&qname).await {
            Ok(mut resolved) => {
                response.set_authoritative(true);
                response.set_response_code(ResponseCode::NoError);

                self.steering.steer(&qname, client_ip, &mut resolved.record);
                let answers = self.handler.answers(question.name(), qtype, &resolved);

                if answers.is_empty() {
                    // NODATA; SOA for negative caching
                    let apex = if resolved.location == Location::Apex {
                        Some(resolved.record)
                    } else {
                        self.handler.get_location(&resolved.zone, &Location::Apex).await.ok()
                    };
                    let soa = self.handler.soa(&resolved.zone, &apex.unwrap_or_default());
                    if let Some(soa) = soa {
                        response.add_name_server(soa);
                    }
                } else {
                    for answer in answers {
                        response.add_answer(answer);
                    }
                }
            }
            Err(e) => {
                debug!("No answer for {}: {}", qname, e);
                response.set_response_code(e.response_code());

                if let Some(zone) = e.zone() {
                    response.set_authoritative(true);
                    let apex = self.handler.get_location(zone, &Location::Apex).await.unwrap_or_default();
                    if let Some(soa) = self.handler.soa(zone, &apex) {
                        response.add_name_server(soa);
                    }
                }
            }
        }
    }

    pub fn handler(&self) -> &Arc<RequestHandler> {
        &self.handler
    }

    pub fn config(&self) -> &DnsConfig {
        &self.config
    }
}
