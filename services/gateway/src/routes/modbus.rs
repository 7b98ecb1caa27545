//! Industrial-bus proxy: Modbus-TCP requests relayed for local tooling.
//!
//! The handler frames MBAP ADUs directly over a TCP stream. Supported
//! function codes: 3 (read holding registers), 4 (read input registers) and
//! 16 (write multiple registers). Register counts are capped at the
//! protocol's 125-register limit and unit ids at 247.

use egw_protocol::{RequestEnvelope, Response};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tracing::warn;

use super::RouteHandler;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const IO_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REGISTERS: u16 = 125;
const MAX_UNIT_ID: u16 = 247;

pub struct ModbusTcpHandler;

#[derive(serde::Deserialize)]
struct ModbusBody {
    ip: Option<String>,
    port: Option<u16>,
    slave: Option<u16>,
    start: Option<u16>,
    num: Option<u16>,
    func: Option<u8>,
    values: Option<Vec<u16>>,
}

impl RouteHandler for ModbusTcpHandler {
    fn handle(&self, request: &RequestEnvelope) -> Response {
        let Ok(body) = serde_json::from_str::<ModbusBody>(&request.body) else {
            return Response::error(400, "Invalid JSON");
        };

        let Some(ip) = body.ip else {
            return Response::error(400, "Missing 'ip' parameter");
        };
        let Some(slave) = body.slave else {
            return Response::error(400, "Missing 'slave' parameter");
        };
        let Some(start) = body.start else {
            return Response::error(400, "Missing 'start' parameter");
        };
        let Some(func) = body.func else {
            return Response::error(400, "Missing 'func' parameter");
        };
        let port = body.port.unwrap_or(502);

        if slave > MAX_UNIT_ID {
            return Response::error(400, "Invalid parameter values");
        }

        let result = match func {
            3 | 4 => {
                let Some(num) = body.num else {
                    return Response::error(400, "Missing 'num' parameter for read operation");
                };
                if num == 0 || num > MAX_REGISTERS {
                    return Response::error(400, "Invalid parameter values");
                }
                read_registers(&ip, port, slave as u8, func, start, num).map(|values| {
                    serde_json::json!({
                        "status": "success",
                        "ip": ip, "port": port, "slave": slave,
                        "start": start, "num": num, "func": func,
                        "values": values,
                    })
                })
            }
            16 => {
                let Some(values) = body.values.filter(|v| !v.is_empty()) else {
                    return Response::error(400, "Missing 'values' array for write operation");
                };
                if values.len() > usize::from(MAX_REGISTERS) {
                    return Response::error(400, "Invalid parameter values");
                }
                write_registers(&ip, port, slave as u8, start, &values).map(|()| {
                    serde_json::json!({
                        "status": "success",
                        "ip": ip, "port": port, "slave": slave,
                        "start": start, "num": values.len(), "func": func,
                        "written_values": values,
                    })
                })
            }
            _ => {
                return Response::error(
                    400,
                    "Unsupported function code. Supported: 3 (Read Holding), 4 (Read Input), 16 (Write Multiple)",
                );
            }
        };

        match result {
            Ok(body) => Response::ok(body.to_string()),
            Err(e) => {
                warn!(error = %e, "modbus proxy request failed");
                Response::error(500, &e)
            }
        }
    }
}

fn connect(ip: &str, port: u16) -> Result<TcpStream, String> {
    let addr: SocketAddr = format!("{ip}:{port}")
        .parse()
        .map_err(|_| "Invalid IP address format".to_owned())?;
    let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .map_err(|e| format!("Failed to connect to Modbus TCP server: {e}"))?;
    stream.set_read_timeout(Some(IO_TIMEOUT)).ok();
    stream.set_write_timeout(Some(IO_TIMEOUT)).ok();
    Ok(stream)
}

/// Issue one request ADU and read back the response PDU for the same
/// transaction.
fn transact(stream: &mut TcpStream, unit: u8, pdu: &[u8]) -> Result<Vec<u8>, String> {
    // MBAP header: transaction id, protocol id 0, length, unit id.
    let mut adu = Vec::with_capacity(7 + pdu.len());
    adu.extend_from_slice(&1u16.to_be_bytes());
    adu.extend_from_slice(&0u16.to_be_bytes());
    adu.extend_from_slice(&((pdu.len() as u16 + 1).to_be_bytes()));
    adu.push(unit);
    adu.extend_from_slice(pdu);

    stream
        .write_all(&adu)
        .map_err(|e| format!("Modbus write failed: {e}"))?;

    let mut header = [0u8; 7];
    stream
        .read_exact(&mut header)
        .map_err(|e| format!("Modbus read failed: {e}"))?;
    let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
    if length < 2 {
        return Err("Modbus response too short".to_owned());
    }

    let mut response = vec![0u8; length - 1];
    stream
        .read_exact(&mut response)
        .map_err(|e| format!("Modbus read failed: {e}"))?;

    // Exception response: function code with the high bit set.
    if response[0] & 0x80 != 0 {
        let code = response.get(1).copied().unwrap_or(0);
        return Err(format!("Modbus exception code {code}"));
    }
    Ok(response)
}

fn read_registers(
    ip: &str,
    port: u16,
    unit: u8,
    func: u8,
    start: u16,
    num: u16,
) -> Result<Vec<u16>, String> {
    let mut stream = connect(ip, port)?;

    let mut pdu = vec![func];
    pdu.extend_from_slice(&start.to_be_bytes());
    pdu.extend_from_slice(&num.to_be_bytes());

    let response = transact(&mut stream, unit, &pdu)?;
    let byte_count = usize::from(*response.get(1).ok_or("Modbus response too short")?);
    let data = response
        .get(2..2 + byte_count)
        .ok_or("Modbus response truncated")?;

    Ok(data
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

fn write_registers(
    ip: &str,
    port: u16,
    unit: u8,
    start: u16,
    values: &[u16],
) -> Result<(), String> {
    let mut stream = connect(ip, port)?;

    let mut pdu = vec![16u8];
    pdu.extend_from_slice(&start.to_be_bytes());
    pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
    pdu.push((values.len() * 2) as u8);
    for v in values {
        pdu.extend_from_slice(&v.to_be_bytes());
    }

    let response = transact(&mut stream, unit, &pdu)?;
    if response.first() != Some(&16u8) {
        return Err("Unexpected Modbus response function".to_owned());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use egw_protocol::Verb;
    use std::net::TcpListener;

    fn envelope(body: &str) -> RequestEnvelope {
        RequestEnvelope::new("/api/modbus/tcp", Verb::Post, body)
    }

    #[test]
    fn missing_parameters_are_rejected() {
        let h = ModbusTcpHandler;
        for body in [
            r#"{}"#,
            r#"{"ip":"127.0.0.1"}"#,
            r#"{"ip":"127.0.0.1","slave":1}"#,
            r#"{"ip":"127.0.0.1","slave":1,"start":0}"#,
        ] {
            assert_eq!(h.handle(&envelope(body)).status, 400, "body: {body}");
        }
    }

    #[test]
    fn bounds_are_enforced() {
        let h = ModbusTcpHandler;
        // num > 125
        let r = h.handle(&envelope(
            r#"{"ip":"127.0.0.1","slave":1,"start":0,"num":126,"func":3}"#,
        ));
        assert_eq!(r.status, 400);
        // slave > 247
        let r = h.handle(&envelope(
            r#"{"ip":"127.0.0.1","slave":248,"start":0,"num":1,"func":3}"#,
        ));
        assert_eq!(r.status, 400);
        // unsupported function
        let r = h.handle(&envelope(
            r#"{"ip":"127.0.0.1","slave":1,"start":0,"num":1,"func":6}"#,
        ));
        assert_eq!(r.status, 400);
        // write without values
        let r = h.handle(&envelope(
            r#"{"ip":"127.0.0.1","slave":1,"start":0,"func":16}"#,
        ));
        assert_eq!(r.status, 400);
    }

    /// Minimal Modbus server answering one read-holding-registers request.
    fn spawn_server(registers: Vec<u16>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 12];
            stream.read_exact(&mut request).unwrap();
            assert_eq!(request[7], 3, "expected read holding registers");

            let mut pdu = vec![3u8, (registers.len() * 2) as u8];
            for r in &registers {
                pdu.extend_from_slice(&r.to_be_bytes());
            }
            let mut adu = Vec::new();
            adu.extend_from_slice(&request[0..2]); // echo transaction id
            adu.extend_from_slice(&0u16.to_be_bytes());
            adu.extend_from_slice(&((pdu.len() as u16 + 1).to_be_bytes()));
            adu.push(request[6]);
            adu.extend_from_slice(&pdu);
            stream.write_all(&adu).unwrap();
        });
        addr
    }

    #[test]
    fn read_holding_registers_round_trip() {
        let addr = spawn_server(vec![0x0102, 0x0304, 0xFFFF]);
        let h = ModbusTcpHandler;
        let body = format!(
            r#"{{"ip":"127.0.0.1","port":{},"slave":17,"start":100,"num":3,"func":3}}"#,
            addr.port()
        );
        let response = h.handle(&envelope(&body));
        assert_eq!(response.status, 200);
        let json: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(json["values"], serde_json::json!([258, 772, 65535]));
        assert_eq!(json["slave"], 17);
    }

    #[test]
    fn connection_failure_maps_to_500() {
        // Port 1 on localhost is almost certainly closed.
        let h = ModbusTcpHandler;
        let r = h.handle(&envelope(
            r#"{"ip":"127.0.0.1","port":1,"slave":1,"start":0,"num":1,"func":3}"#,
        ));
        assert_eq!(r.status, 500);
    }
}
