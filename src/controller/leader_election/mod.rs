pub mod leader_election;
