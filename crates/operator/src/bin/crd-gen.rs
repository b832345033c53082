use kube::CustomResourceExt;
use nginx_operator::NginxOperator;

fn main() -> anyhow::Result<()> {
    let crd = NginxOperator::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
