use crate::PeerId;
use crate::error::{NodeError, OperatorError};
use crate::protocol::{Cost, MAX_FINITE_COST, Node};
use std::fmt::Write as _;
use std::str::FromStr;

const UPDATE_USAGE: &str = "update <server-id> <neighbor-id> <cost|inf>";
const DISABLE_USAGE: &str = "disable <server-id>";

pub const HELP: &str = "\
update <server-id> <neighbor-id> <cost|inf>  change the cost of a local link
disable <server-id>                          take the link to a neighbor down
crash                                        stop sending and receiving updates
step                                         send a routing update to all neighbors now
display                                      show the routing table
packets                                      packets received since the last call
help                                         show this message";

/// One operator command, as typed on the shell or sent to the control server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Update {
        server_id: PeerId,
        neighbor_id: PeerId,
        cost: Cost,
    },
    Disable(PeerId),
    Crash,
    Step,
    Display,
    Packets,
    Help,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Update { .. } => "update",
            Command::Disable(_) => "disable",
            Command::Crash => "crash",
            Command::Step => "step",
            Command::Display => "display",
            Command::Packets => "packets",
            Command::Help => "help",
        }
    }

    /// Runs the command against `node` and returns its output, possibly empty.
    pub async fn execute(&self, node: &Node) -> Result<String, NodeError> {
        match *self {
            Command::Update {
                server_id,
                neighbor_id,
                cost,
            } => {
                node.update_link(server_id, neighbor_id, cost).await?;
                Ok(String::new())
            }
            Command::Disable(id) => {
                node.disable_link(id).await?;
                Ok(String::new())
            }
            Command::Crash => {
                node.crash().await?;
                Ok(String::new())
            }
            Command::Step => {
                let outcome = node.step().await?;
                let mut output = String::new();
                for id in &outcome.timed_out {
                    let _ = writeln!(output, "Server {} timed out", id);
                }
                let _ = write!(output, "Sent routing update to {} neighbors", outcome.outbound.len());
                Ok(output)
            }
            Command::Display => node.display().await,
            Command::Packets => Ok(node.take_packet_count().await?.to_string()),
            Command::Help => Ok(HELP.to_string()),
        }
    }
}

impl FromStr for Command {
    type Err = OperatorError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let keyword = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        let command = match (keyword.as_str(), args.as_slice()) {
            ("update", [server, neighbor, cost]) => Command::Update {
                server_id: parse_id(server)?,
                neighbor_id: parse_id(neighbor)?,
                cost: parse_cost(cost)?,
            },
            ("update", _) => return Err(OperatorError::Usage(UPDATE_USAGE)),
            ("disable", [id]) => Command::Disable(parse_id(id)?),
            ("disable", _) => return Err(OperatorError::Usage(DISABLE_USAGE)),
            ("crash", []) => Command::Crash,
            ("step", []) => Command::Step,
            ("display", []) => Command::Display,
            ("packets", []) => Command::Packets,
            ("help", []) => Command::Help,
            ("crash" | "step" | "display" | "packets" | "help", _) => {
                return Err(OperatorError::InvalidArgument(args.join(" ")));
            }
            _ => return Err(OperatorError::UnknownCommand(keyword)),
        };
        Ok(command)
    }
}

fn parse_id(field: &str) -> Result<PeerId, OperatorError> {
    field
        .parse()
        .map_err(|_| OperatorError::InvalidArgument(field.to_string()))
}

fn parse_cost(field: &str) -> Result<Cost, OperatorError> {
    if field.eq_ignore_ascii_case("inf") {
        return Ok(Cost::Infinite);
    }
    field
        .parse::<u32>()
        .ok()
        .filter(|&cost| cost <= MAX_FINITE_COST)
        .map(Cost::Finite)
        .ok_or_else(|| OperatorError::InvalidArgument(field.to_string()))
}

/// `"<command> SUCCESS"` plus any output, or `"<command> <error>"`.
pub fn render(name: &str, result: &Result<String, NodeError>) -> String {
    match result {
        Ok(output) if output.is_empty() => format!("{} SUCCESS", name),
        Ok(output) => format!("{} SUCCESS\n{}", name, output),
        Err(e) => format!("{} {}", name, e),
    }
}

/// Parses and runs one shell line. Blank lines produce no response.
pub async fn run_line(node: &Node, line: &str) -> Option<String> {
    let line = line.trim();
    let name = line.split_whitespace().next()?.to_ascii_lowercase();

    let result = match line.parse::<Command>() {
        Ok(command) => command.execute(node).await,
        Err(e) => Err(NodeError::from(e)),
    };
    Some(render(&name, &result))
}
