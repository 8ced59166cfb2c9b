use std::error::Error;
use std::io::Cursor;
use std::net::ToSocketAddrs;
use std::time::Instant;

use json::{object, JsonValue};
use tiny_http::{Header, Method, Request, Response};

use crate::controller::Controller;
use crate::device::Device;
use crate::error::Error as ControlError;

const JSON_CONTENT_TYPE: &str = "Content-type: application/json; charset=utf-8";
const DEFAULT_EVENT_LIMIT: usize = 100;

pub struct Server(tiny_http::Server);

impl Server {
    pub fn new<A>(addr: A) -> Result<Server, Box<dyn Error + Send + Sync + 'static>>
    where
        A: ToSocketAddrs,
    {
        tiny_http::Server::http(addr).map(Server)
    }

    pub fn handle_requests(&self, controller: &Controller) {
        for request in self.0.incoming_requests() {
            let response = route(controller, &request);
            // Ignoring I/O errors that occur here so that we don't take down the process if there
            // is an issue sending the response.
            let _ = request.respond(response);
        }
    }

    pub fn shutdown(&self) {
        self.0.unblock();
    }
}

fn route(controller: &Controller, request: &Request) -> Response<Cursor<Vec<u8>>> {
    let (path, query) = match request.url().split_once('?') {
        Some((path, query)) => (path, query),
        None => (request.url(), ""),
    };
    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    match (request.method(), segments.as_slice()) {
        (Method::Get, []) => respond(200, overview(controller)),
        (Method::Get, ["status", device]) => match decode(device).parse::<Device>() {
            Ok(device) => respond(
                200,
                object! { status: controller.query_status(device).as_str() },
            ),
            Err(err) => message(404, &err.to_string()),
        },
        (Method::Post, ["change_status", device, command]) => {
            match controller.command(&decode(device), &decode(command)) {
                Ok(reply) => message(200, &reply.to_string()),
                Err(ControlError::Config(err)) => message(400, &err.to_string()),
                Err(err) => message(500, &err.to_string()),
            }
        }
        (Method::Post, ["cancel", device]) => match decode(device).parse::<Device>() {
            Ok(device) => {
                let cancelled = controller.cancel(device);
                respond(200, object! { cancelled: cancelled })
            }
            Err(err) => message(404, &err.to_string()),
        },
        (Method::Get, ["active_motor_count"]) => {
            respond(200, object! { count: controller.active_motor_count() })
        }
        (Method::Get, ["temperature"]) => match controller.temperature() {
            Ok(temperature) => respond(
                200,
                object! { temperature: (temperature * 100.0).round() / 100.0 },
            ),
            Err(err) => message(503, &err.to_string()),
        },
        (Method::Get, ["events"]) => {
            let limit = query_param(query, "limit")
                .and_then(|limit| limit.parse().ok())
                .unwrap_or(DEFAULT_EVENT_LIMIT);
            respond(200, events(controller, limit))
        }
        _ => Response::from_string("Not found").with_status_code(404),
    }
}

fn overview(controller: &Controller) -> JsonValue {
    let now = Instant::now();
    let formatter = timeago::Formatter::new();
    let mut devices = JsonValue::new_object();
    for device in Device::ALL {
        devices[device.key()] = object! {
            status: controller.query_status(device).as_str(),
            since: controller
                .status_since(device)
                .map(|since| formatter.convert(now.duration_since(since))),
            intended: controller.intended_action(device).map(|a| a.as_str())
        };
    }
    object! {
        devices: devices,
        active_motor_count: controller.active_motor_count()
    }
}

fn events(controller: &Controller, limit: usize) -> JsonValue {
    let mut events = JsonValue::new_array();
    for event in controller.recent_events(limit) {
        // Only fails when pushing onto a non-array.
        let _ = events.push(object! {
            timestamp: event.timestamp,
            event: event.message
        });
    }
    object! { events: events }
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Undo URL encoding, e.g. `Slug%20Shutter` or `Slug+Shutter`. Malformed
/// escapes are kept as they are.
fn decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            b'%' => match bytes.get(i + 1..i + 3).and_then(hex_byte) {
                Some(byte) => {
                    decoded.push(byte);
                    i += 3;
                }
                None => {
                    decoded.push(b'%');
                    i += 1;
                }
            },
            byte => {
                decoded.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_byte(digits: &[u8]) -> Option<u8> {
    let digit = |d: u8| (d as char).to_digit(16);
    Some((digit(digits[0])? * 16 + digit(digits[1])?) as u8)
}

fn message(status: u16, text: &str) -> Response<Cursor<Vec<u8>>> {
    respond(status, object! { message: text })
}

fn respond(status: u16, body: JsonValue) -> Response<Cursor<Vec<u8>>> {
    let response = Response::from_string(json::stringify_pretty(body, 2)).with_status_code(status);
    match JSON_CONTENT_TYPE.parse::<Header>() {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}
