use alloy::json_abi::StateMutability;
use std::collections::HashMap;

use super::action::action_type;
use super::error::{EngineError, EngineResult};
use crate::ethereum::abi::{DeclaredKind, InterfaceDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Function,
    Event,
}

/// Fixed description of one named interface member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDescriptor {
    pub name: String,
    pub kind: MemberKind,
    /// Declared input types, in order.
    pub inputs: Vec<String>,
    /// `view`/`pure` functions.
    pub constant: bool,
}

impl MemberDescriptor {
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn action_type(&self) -> String {
        action_type(&self.name)
    }
}

/// Named members of an interface description, in the order they were
/// declared. Overloads appear once per declaration.
#[derive(Debug, Clone, Default)]
pub struct InterfaceRegistry {
    members: Vec<MemberDescriptor>,
}

impl InterfaceRegistry {
    pub fn new(interface: &InterfaceDescriptor) -> Self {
        let abi = interface.abi();
        // k-th declaration of a name is the k-th overload
        let mut seen: HashMap<(DeclaredKind, &str), usize> = HashMap::new();
        let mut members = Vec::with_capacity(interface.order().len());

        for item in interface.order() {
            if item.name.is_empty() {
                continue;
            }
            let index = seen.entry((item.kind, item.name.as_str())).or_insert(0);
            let position = *index;
            *index += 1;

            let member = match item.kind {
                DeclaredKind::Function => abi
                    .function(&item.name)
                    .and_then(|overloads| overloads.get(position))
                    .map(|function| MemberDescriptor {
                        name: function.name.clone(),
                        kind: MemberKind::Function,
                        inputs: function.inputs.iter().map(|p| p.ty.clone()).collect(),
                        constant: matches!(
                            function.state_mutability,
                            StateMutability::View | StateMutability::Pure
                        ),
                    }),
                DeclaredKind::Event => abi
                    .event(&item.name)
                    .and_then(|overloads| overloads.get(position))
                    .map(|event| MemberDescriptor {
                        name: event.name.clone(),
                        kind: MemberKind::Event,
                        inputs: event.inputs.iter().map(|p| p.ty.clone()).collect(),
                        constant: false,
                    }),
            };
            members.extend(member);
        }

        Self { members }
    }

    pub fn members(&self) -> &[MemberDescriptor] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn event_names(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| m.kind == MemberKind::Event)
            .map(|m| m.name.as_str())
            .collect()
    }

    pub fn action_types(&self) -> Vec<String> {
        self.members.iter().map(MemberDescriptor::action_type).collect()
    }

    pub fn has_action_type(&self, label: &str) -> bool {
        self.members.iter().any(|m| m.action_type() == label)
    }

    /// Fails when two differently named members derive the same action type.
    pub fn check_collisions(&self) -> EngineResult<()> {
        let mut seen: HashMap<String, &str> = HashMap::new();
        for member in &self.members {
            let label = member.action_type();
            if let Some(other) = seen.get(&label) {
                if *other != member.name {
                    return Err(EngineError::InvalidBinding(format!(
                        "members '{}' and '{}' both map to action type {}",
                        other, member.name, label
                    )));
                }
                continue;
            }
            seen.insert(label, member.name.as_str());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::abi::parse_interface;
    use alloy::json_abi::JsonAbi;
    use serde_json::json;

    fn token_abi() -> InterfaceDescriptor {
        InterfaceDescriptor::from_value(json!([
            {"type": "constructor", "inputs": [], "stateMutability": "nonpayable"},
            {"type": "function", "name": "balanceOf", "stateMutability": "view",
             "inputs": [{"name": "owner", "type": "address"}],
             "outputs": [{"name": "", "type": "uint256"}]},
            {"type": "function", "name": "totalSupply", "stateMutability": "view",
             "inputs": [], "outputs": [{"name": "", "type": "uint256"}]},
            {"type": "function", "name": "transfer", "stateMutability": "nonpayable",
             "inputs": [{"name": "to", "type": "address"}, {"name": "value", "type": "uint256"}],
             "outputs": [{"name": "", "type": "bool"}]},
            {"type": "event", "name": "Transfer", "anonymous": false,
             "inputs": [{"name": "from", "type": "address", "indexed": true},
                        {"name": "to", "type": "address", "indexed": true},
                        {"name": "value", "type": "uint256", "indexed": false}]}
        ]))
        .unwrap()
    }

    #[test]
    fn test_member_and_event_names() {
        let registry = InterfaceRegistry::new(&token_abi());

        assert_eq!(
            registry.member_names(),
            vec!["balanceOf", "totalSupply", "transfer", "Transfer"]
        );
        assert_eq!(registry.event_names(), vec!["Transfer"]);
        assert_eq!(
            registry.action_types(),
            vec!["BALANCE_OF", "TOTAL_SUPPLY", "TRANSFER", "_TRANSFER"]
        );
    }

    #[test]
    fn test_members_follow_declaration_order() {
        let interface = parse_interface(
            r#"[
                {"type":"event","name":"Zapped","inputs":[],"anonymous":false},
                {"type":"function","name":"zeta","inputs":[],"outputs":[],"stateMutability":"view"},
                {"type":"function","name":"alpha","inputs":[],"outputs":[],"stateMutability":"nonpayable"}
            ]"#,
        )
        .unwrap();
        let registry = InterfaceRegistry::new(&interface);

        assert_eq!(registry.member_names(), vec!["Zapped", "zeta", "alpha"]);
        assert_eq!(registry.action_types(), vec!["_ZAPPED", "ZETA", "ALPHA"]);
        assert_eq!(registry.event_names(), vec!["Zapped"]);
    }

    #[test]
    fn test_overloads_keep_their_own_declarations() {
        let interface = InterfaceDescriptor::from_value(json!([
            {"type": "function", "name": "foo", "stateMutability": "nonpayable",
             "inputs": [{"name": "x", "type": "uint256"}], "outputs": []},
            {"type": "event", "name": "Fooed", "anonymous": false, "inputs": []},
            {"type": "function", "name": "foo", "stateMutability": "view",
             "inputs": [], "outputs": [{"name": "", "type": "uint256"}]}
        ]))
        .unwrap();
        let registry = InterfaceRegistry::new(&interface);
        let members = registry.members();

        assert_eq!(registry.member_names(), vec!["foo", "Fooed", "foo"]);
        assert!(!members[0].constant);
        assert_eq!(members[0].input_count(), 1);
        assert!(members[2].constant);
        assert_eq!(members[2].input_count(), 0);
    }

    #[test]
    fn test_constant_and_inputs() {
        let registry = InterfaceRegistry::new(&token_abi());
        let members = registry.members();

        assert!(members[0].constant);
        assert_eq!(members[0].input_count(), 1);
        assert_eq!(members[1].input_count(), 0);
        assert!(!members[2].constant);
        assert_eq!(members[2].inputs, vec!["address", "uint256"]);
    }

    #[test]
    fn test_empty_interface() {
        let registry = InterfaceRegistry::new(&JsonAbi::default().into());

        assert!(registry.is_empty());
        assert!(registry.member_names().is_empty());
        assert!(registry.check_collisions().is_ok());
    }

    #[test]
    fn test_action_type_collision_detected() {
        let abi = InterfaceDescriptor::from_value(json!([
            {"type": "function", "name": "setOwner", "stateMutability": "nonpayable",
             "inputs": [], "outputs": []},
            {"type": "function", "name": "set_owner", "stateMutability": "nonpayable",
             "inputs": [], "outputs": []}
        ]))
        .unwrap();
        let registry = InterfaceRegistry::new(&abi);

        assert!(matches!(
            registry.check_collisions(),
            Err(EngineError::InvalidBinding(_))
        ));
        assert!(InterfaceRegistry::new(&token_abi()).check_collisions().is_ok());
    }
}
