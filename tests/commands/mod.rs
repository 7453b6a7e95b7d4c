mod test_collect;
mod test_subscription_flow;
