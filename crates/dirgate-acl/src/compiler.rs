//! Policy compilation.
//!
//! [`AclCompiler::compile`] is a pure function of its inputs: the subject, a
//! flat membership closure, a definitions snapshot, and that snapshot's
//! revision. Everything it walks is a `BTreeMap`/`BTreeSet`, so the output is
//! identical no matter how assignments or rules were ordered on input.
//!
//! Conflicts resolve deny-overrides:
//!
//! 1. any applicable unscoped deny makes the permission `deny`;
//! 2. scoped denies are kept and deny resources matching their group;
//! 3. otherwise the allow scopes are unioned, and one unscoped allow makes
//!    the grant unrestricted;
//! 4. with no rule at all the permission is absent, an implicit deny.

use dirgate_core::{
    AttributeGroupName, CompiledAcl, CompiledPermission, DefinitionId, Definitions, Effect,
    PermissionKey, PolicyName, PrincipalRef, Scope,
};
use std::collections::{BTreeMap, BTreeSet};

/// Per-permission accumulator while rules are folded in.
#[derive(Debug, Default)]
struct Resolution {
    unscoped_deny: bool,
    deny_scopes: BTreeSet<AttributeGroupName>,
    allow: Option<Scope>,
}

impl Resolution {
    fn add(&mut self, effect: Effect, group: Option<&AttributeGroupName>) {
        match (effect, group) {
            (Effect::Deny, None) => self.unscoped_deny = true,
            (Effect::Deny, Some(g)) => {
                self.deny_scopes.insert(g.clone());
            }
            (Effect::Allow, group) => {
                let current = self
                    .allow
                    .take()
                    .unwrap_or_else(|| Scope::Groups(BTreeSet::new()));
                self.allow = Some(current.union(group));
            }
        }
    }

    fn finish(self) -> CompiledPermission {
        match self.allow {
            Some(scope) if !self.unscoped_deny => CompiledPermission {
                effect: Effect::Allow,
                allow: Some(scope),
                deny_scopes: self.deny_scopes,
            },
            _ => CompiledPermission {
                effect: Effect::Deny,
                allow: None,
                deny_scopes: BTreeSet::new(),
            },
        }
    }
}

/// Resolves a principal's assignments into a [`CompiledAcl`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AclCompiler;

impl AclCompiler {
    /// Creates a compiler.
    pub fn new() -> Self {
        Self
    }

    /// Compiles the decision table for `subject`.
    ///
    /// `closure` is taken as-is; it is never expanded further. Assignments
    /// bound to the subject or to any closure member contribute.
    pub fn compile(
        &self,
        subject: &PrincipalRef,
        closure: &BTreeSet<PrincipalRef>,
        definitions: &Definitions,
        generation: u64,
    ) -> CompiledAcl {
        let mut principals = closure.clone();
        principals.insert(subject.clone());

        let mut dependencies: BTreeSet<DefinitionId> = principals
            .iter()
            .cloned()
            .map(DefinitionId::Principal)
            .collect();

        let mut policies: BTreeSet<&PolicyName> = BTreeSet::new();
        for assignment in definitions.assignments_for(&principals) {
            dependencies.insert(DefinitionId::Assignment(assignment.key()));
            dependencies.insert(DefinitionId::Policy(assignment.policy.clone()));
            policies.insert(&assignment.policy);
        }

        let mut resolutions: BTreeMap<PermissionKey, Resolution> = BTreeMap::new();
        for name in policies {
            let Some(policy) = definitions.policies.get(name) else {
                log::warn!("Assignment references missing policy '{name}'; skipping");
                continue;
            };
            for rule in &policy.rules {
                if let Some(group) = &rule.attribute_group {
                    dependencies.insert(DefinitionId::AttributeGroup(group.clone()));
                }
                for key in &rule.permissions {
                    resolutions
                        .entry(key.clone())
                        .or_default()
                        .add(rule.effect, rule.attribute_group.as_ref());
                }
            }
        }

        let entries: BTreeMap<PermissionKey, CompiledPermission> = resolutions
            .into_iter()
            .map(|(key, resolution)| (key, resolution.finish()))
            .collect();

        let mut attribute_groups = BTreeMap::new();
        for entry in entries.values() {
            let allow_groups = match &entry.allow {
                Some(Scope::Groups(groups)) => Some(groups),
                _ => None,
            };
            for name in entry.deny_scopes.iter().chain(allow_groups.into_iter().flatten()) {
                if let Some(group) = definitions.attribute_groups.get(name) {
                    attribute_groups.insert(name.clone(), group.selector.clone());
                }
            }
        }

        CompiledAcl {
            principal: subject.clone(),
            generation,
            entries,
            attribute_groups,
            dependencies,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use dirgate_core::{
        AclAssignment, AttributeGroup, AttributeSelector, Decision, Mutation, Origin, Permission,
        Policy, ResourceAttributes, Rule,
    };
    use proptest::prelude::*;

    fn rule(effect: Effect, keys: &[&str], group: Option<&str>, priority: u32) -> Rule {
        Rule {
            effect,
            permissions: keys.iter().map(|k| PermissionKey::new(*k)).collect(),
            attribute_group: group.map(AttributeGroupName::new),
            priority,
        }
    }

    fn definitions(
        policies: Vec<(&str, Vec<Rule>)>,
        assignments: Vec<(PrincipalRef, &str)>,
    ) -> Definitions {
        let mut defs = Definitions::new();
        for key in ["user.delete", "user.read", "user.create"] {
            defs.apply(Mutation::PutPermission(Permission::new(
                PermissionKey::new(key),
                "user",
            )));
        }
        for (name, dept) in [("dept-eng", "eng"), ("dept-ops", "ops")] {
            defs.apply(Mutation::PutAttributeGroup(AttributeGroup {
                name: AttributeGroupName::new(name),
                selector: AttributeSelector::Pattern(
                    [("dept".to_string(), dept.to_string())].into_iter().collect(),
                ),
                origin: Origin::Registry,
            }));
        }
        for (name, rules) in policies {
            defs.apply(Mutation::PutPolicy(
                Policy::new(PolicyName::new(name), None, rules, Origin::Registry).unwrap(),
            ));
        }
        for (principal, policy) in assignments {
            defs.apply(Mutation::PutAssignment(AclAssignment {
                principal,
                policy: PolicyName::new(policy),
                builtin: false,
                origin: Origin::Registry,
            }));
        }
        defs.check_integrity().unwrap();
        defs
    }

    fn admins() -> BTreeSet<PrincipalRef> {
        [PrincipalRef::role("admins")].into_iter().collect()
    }

    fn dept(value: &str) -> ResourceAttributes {
        [("dept".to_string(), value.to_string())].into_iter().collect()
    }

    fn key(k: &str) -> PermissionKey {
        PermissionKey::new(k)
    }

    #[test]
    fn test_role_grant_reaches_member() {
        let defs = definitions(
            vec![("admins-policy", vec![rule(Effect::Allow, &["user.delete"], None, 1)])],
            vec![(PrincipalRef::role("admins"), "admins-policy")],
        );
        let alice = PrincipalRef::user("alice");
        let acl = AclCompiler::new().compile(&alice, &admins(), &defs, 7);
        assert_eq!(acl.generation, 7);
        assert!(acl.evaluate(&key("user.delete"), None).is_allowed());
        assert_eq!(acl.evaluate(&key("user.read"), None), Decision::deny());

        let bob = AclCompiler::new().compile(
            &PrincipalRef::user("bob"),
            &BTreeSet::new(),
            &defs,
            7,
        );
        assert!(bob.entries.is_empty());
        assert!(!bob.evaluate(&key("user.delete"), None).is_allowed());
    }

    #[test]
    fn test_unscoped_deny_overrides_allow_across_policies() {
        let defs = definitions(
            vec![
                ("admins-policy", vec![rule(Effect::Allow, &["user.delete"], None, 1)]),
                ("restrict-delete", vec![rule(Effect::Deny, &["user.delete"], None, 1)]),
            ],
            vec![
                (PrincipalRef::role("admins"), "admins-policy"),
                (PrincipalRef::role("admins"), "restrict-delete"),
            ],
        );
        let acl = AclCompiler::new().compile(&PrincipalRef::user("alice"), &admins(), &defs, 1);
        let entry = &acl.entries[&key("user.delete")];
        assert_eq!(entry.effect, Effect::Deny);
        assert!(entry.allow.is_none());
    }

    #[test]
    fn test_allow_scopes_union() {
        let defs = definitions(
            vec![(
                "scoped",
                vec![
                    rule(Effect::Allow, &["user.delete"], Some("dept-eng"), 1),
                    rule(Effect::Allow, &["user.delete"], Some("dept-ops"), 2),
                ],
            )],
            vec![(PrincipalRef::role("admins"), "scoped")],
        );
        let acl = AclCompiler::new().compile(&PrincipalRef::user("alice"), &admins(), &defs, 1);
        assert!(acl.evaluate(&key("user.delete"), Some(&dept("eng"))).is_allowed());
        assert!(acl.evaluate(&key("user.delete"), Some(&dept("ops"))).is_allowed());
        assert!(!acl.evaluate(&key("user.delete"), Some(&dept("sales"))).is_allowed());
        assert_eq!(acl.attribute_groups.len(), 2);
    }

    #[test]
    fn test_unscoped_allow_makes_grant_unrestricted() {
        let defs = definitions(
            vec![(
                "mixed",
                vec![
                    rule(Effect::Allow, &["user.read"], Some("dept-eng"), 1),
                    rule(Effect::Allow, &["user.read"], None, 2),
                ],
            )],
            vec![(PrincipalRef::role("admins"), "mixed")],
        );
        let acl = AclCompiler::new().compile(&PrincipalRef::user("alice"), &admins(), &defs, 1);
        assert_eq!(acl.entries[&key("user.read")].allow, Some(Scope::Unrestricted));
        assert!(acl.attribute_groups.is_empty());
    }

    #[test]
    fn test_scoped_deny_carves_out_of_allow() {
        let defs = definitions(
            vec![(
                "carve",
                vec![
                    rule(Effect::Allow, &["user.delete"], None, 1),
                    rule(Effect::Deny, &["user.delete"], Some("dept-ops"), 2),
                ],
            )],
            vec![(PrincipalRef::role("admins"), "carve")],
        );
        let acl = AclCompiler::new().compile(&PrincipalRef::user("alice"), &admins(), &defs, 1);
        assert!(acl.evaluate(&key("user.delete"), Some(&dept("eng"))).is_allowed());
        let denied = acl.evaluate(&key("user.delete"), Some(&dept("ops")));
        assert_eq!(denied.effect, Effect::Deny);
        assert_eq!(denied.matched_scope, Some(AttributeGroupName::new("dept-ops")));
    }

    #[test]
    fn test_dependencies_cover_contributors() {
        let defs = definitions(
            vec![("scoped", vec![rule(Effect::Allow, &["user.delete"], Some("dept-eng"), 1)])],
            vec![(PrincipalRef::role("admins"), "scoped")],
        );
        let alice = PrincipalRef::user("alice");
        let acl = AclCompiler::new().compile(&alice, &admins(), &defs, 1);
        for id in [
            DefinitionId::Principal(alice.clone()),
            DefinitionId::Principal(PrincipalRef::role("admins")),
            DefinitionId::Policy(PolicyName::new("scoped")),
            DefinitionId::AttributeGroup(AttributeGroupName::new("dept-eng")),
        ] {
            assert!(acl.depends_on(&id), "missing dependency {id}");
        }
        assert!(!acl.depends_on(&DefinitionId::AttributeGroup(AttributeGroupName::new(
            "dept-ops"
        ))));
    }

    #[derive(Debug, Clone)]
    struct GenRule {
        effect: Effect,
        key: usize,
        group: Option<usize>,
    }

    fn gen_rule() -> impl Strategy<Value = GenRule> {
        (any::<bool>(), 0..3usize, proptest::option::of(0..2usize)).prop_map(
            |(allow, key, group)| GenRule {
                effect: if allow { Effect::Allow } else { Effect::Deny },
                key,
                group,
            },
        )
    }

    const KEYS: [&str; 3] = ["user.delete", "user.read", "user.create"];
    const GROUPS: [&str; 2] = ["dept-eng", "dept-ops"];

    fn to_rule(r: &GenRule, priority: u32) -> Rule {
        rule(r.effect, &[KEYS[r.key]], r.group.map(|g| GROUPS[g]), priority)
    }

    proptest! {
        #[test]
        fn prop_split_and_order_do_not_matter(rules in proptest::collection::vec(gen_rule(), 1..12)) {
            // All rules in one policy.
            let single: Vec<Rule> = rules
                .iter()
                .enumerate()
                .map(|(i, r)| to_rule(r, i as u32))
                .collect();
            let one = definitions(
                vec![("all", single)],
                vec![(PrincipalRef::role("admins"), "all")],
            );

            // One rule per policy, bound in reverse across subject and role.
            let names: Vec<String> = (0..rules.len()).map(|i| format!("p{i}")).collect();
            let many_policies = rules
                .iter()
                .zip(&names)
                .rev()
                .map(|(r, n)| (n.as_str(), vec![to_rule(r, 1)]))
                .collect();
            let many_assignments = names
                .iter()
                .enumerate()
                .map(|(i, n)| {
                    let who = if i % 2 == 0 {
                        PrincipalRef::role("admins")
                    } else {
                        PrincipalRef::user("alice")
                    };
                    (who, n.as_str())
                })
                .collect();
            let many = definitions(many_policies, many_assignments);

            let alice = PrincipalRef::user("alice");
            let a = AclCompiler::new().compile(&alice, &admins(), &one, 1);
            let b = AclCompiler::new().compile(&alice, &admins(), &many, 1);
            prop_assert_eq!(a.entries, b.entries);
            prop_assert_eq!(a.attribute_groups, b.attribute_groups);
        }

        #[test]
        fn prop_unscoped_deny_always_denies(rules in proptest::collection::vec(gen_rule(), 1..12), value in "eng|ops|sales") {
            let single: Vec<Rule> = rules
                .iter()
                .enumerate()
                .map(|(i, r)| to_rule(r, i as u32))
                .collect();
            let defs = definitions(
                vec![("all", single)],
                vec![(PrincipalRef::role("admins"), "all")],
            );
            let acl = AclCompiler::new().compile(&PrincipalRef::user("alice"), &admins(), &defs, 1);
            for (i, k) in KEYS.iter().enumerate() {
                let has_unscoped_deny = rules
                    .iter()
                    .any(|r| r.key == i && r.effect == Effect::Deny && r.group.is_none());
                if has_unscoped_deny {
                    prop_assert!(!acl.evaluate(&key(k), Some(&dept(&value))).is_allowed());
                    prop_assert!(!acl.evaluate(&key(k), None).is_allowed());
                }
                let denied_here = rules.iter().any(|r| {
                    r.key == i
                        && r.effect == Effect::Deny
                        && r.group.is_some_and(|g| GROUPS[g] == format!("dept-{value}"))
                });
                if denied_here {
                    prop_assert!(!acl.evaluate(&key(k), Some(&dept(&value))).is_allowed());
                }
            }
        }
    }
}
