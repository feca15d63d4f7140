use casbin::prelude::DefaultModel;

// keyMatch2 gives `:param` single-segment wildcards and `/*` suffix wildcards;
// the action clause lets a stored `*` stand for every verb.
const MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && keyMatch2(r.obj, p.obj) && (r.act == p.act || p.act == "*")
"#;

pub async fn casbin_model() -> casbin::Result<DefaultModel> {
    DefaultModel::from_str(MODEL).await
}
