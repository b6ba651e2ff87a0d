mod trust_record;
