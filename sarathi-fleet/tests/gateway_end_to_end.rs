//! Whole gateway against a local shadow relay and the simulated mesh

use sarathi_fleet::app::FleetApp;
use sarathi_fleet::config::FleetConfig;
use serde_json::{Value, json};
use setu_io::config::SimRobotConfig;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

fn read_publish(reader: &mut BufReader<TcpStream>) -> Value {
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).expect("relay read");
        assert!(n > 0, "gateway closed the connection");
        let message: Value = serde_json::from_str(&line).unwrap();
        if message["type"] == "publish" {
            return message;
        }
    }
}

#[test]
fn test_delta_to_revolution_report() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();

    let mut config = FleetConfig::default();
    config.cloud.endpoint = listener.local_addr().unwrap().to_string();
    config.modem.attach_delay_ms = 10;
    config.sim.speed_factor = 20.0;
    config.sim.robots = vec![
        SimRobotConfig {
            address: 0x0010,
            id: 0xAAAA_AAAA_AAAA,
        },
        SimRobotConfig {
            address: 0x0020,
            id: 0x0000_0000_0020,
        },
    ];
    let app = FleetApp::start(config).unwrap();

    let (socket, _) = listener.accept().unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut reader = BufReader::new(socket.try_clone().unwrap());
    let mut relay = socket;

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = Vec::new();
    let mut delta_sent = false;
    let revolutions = loop {
        assert!(Instant::now() < deadline, "no revolution report");
        let publish = read_publish(&mut reader);
        let ack = json!({"type": "puback", "id": publish["id"]});
        writeln!(relay, "{}", ack).unwrap();

        let robots = publish["payload"]["state"]["reported"]["robots"].clone();
        let Some(robots) = robots.as_object() else {
            continue;
        };
        for id in robots.keys() {
            if !seen.contains(id) {
                seen.push(id.clone());
            }
        }

        let only_revolutions = robots.len() == 2
            && robots
                .values()
                .all(|r| r.as_object().is_some_and(|o| o.len() == 1) && r["revolutionCount"].is_u64());
        if delta_sent && only_revolutions {
            break robots.clone();
        }

        if !delta_sent && seen.len() == 2 {
            let delta = json!({"type": "delta", "payload": {
                "version": 1,
                "state": {"desired": {"robots": {
                    "aaaaaaaaaaaa": {"driveTimeMs": 1000, "angleDeg": 90},
                    "000000000020": {"driveTimeMs": 500, "angleDeg": -90}
                }}}
            }});
            writeln!(relay, "{}", delta).unwrap();
            delta_sent = true;
        }
    };

    // 1000 ms and 500 ms at full speed, 250 ms per revolution
    assert_eq!(revolutions["aaaaaaaaaaaa"]["revolutionCount"], 4);
    assert_eq!(revolutions["000000000020"]["revolutionCount"], 2);

    let stats = app.stats();
    app.shutdown();
    assert_eq!(stats.rx_dropped, 0);
}
